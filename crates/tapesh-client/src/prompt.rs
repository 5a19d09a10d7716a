//! Shell prompt decoration.
//!
//! Prepends a colored `[tapesh - …]` tag to the child shell's prompt so the
//! user can see the session is tracked. Each supported shell gets its own rc
//! mechanism: bash via `--rcfile`, zsh via a temporary `ZDOTDIR`, fish via a
//! `-C` init snippet, and anything else via a POSIX `ENV=` file. Failures
//! degrade to an undecorated prompt; they never block the session.

use std::path::Path;

use tempfile::TempDir;
use tracing::debug;

/// Argv and environment adjustments for the child shell, plus ownership of
/// the generated rc directory. Dropping the setup removes the directory, so
/// keep it alive for the life of the session.
pub struct PromptSetup {
    /// Arguments appended after the shell binary.
    pub args: Vec<String>,
    /// Environment overrides for the child.
    pub env: Vec<(String, String)>,
    _rc_dir: Option<TempDir>,
}

impl PromptSetup {
    fn none() -> Self {
        Self {
            args: Vec::new(),
            env: Vec::new(),
            _rc_dir: None,
        }
    }
}

/// Build the prompt decoration for `shell`, tagging prompts with `tag`.
pub fn setup_prompt(shell: &str, tag: &str) -> PromptSetup {
    let base = Path::new(shell)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let setup = if base.starts_with("bash") {
        bash_setup(tag)
    } else if base.starts_with("zsh") {
        zsh_setup(tag)
    } else if base.starts_with("fish") {
        Some(fish_setup(tag))
    } else {
        posix_setup(tag)
    };

    match setup {
        Some(setup) => setup,
        None => {
            debug!(shell = %shell, "prompt decoration unavailable, continuing without");
            PromptSetup::none()
        }
    }
}

fn rc_dir() -> Option<TempDir> {
    tempfile::Builder::new().prefix("tapesh-rc-").tempdir().ok()
}

fn bash_setup(tag: &str) -> Option<PromptSetup> {
    let dir = rc_dir()?;
    let content = format!(
        "[[ -f \"$HOME/.bashrc\" ]] && source \"$HOME/.bashrc\"\n\
         _TAPESH_ORIG_PS1=\"$PS1\"\n\
         _TAPESH_ORIG_PROMPT_COMMAND=\"$PROMPT_COMMAND\"\n\
         PROMPT_COMMAND='eval \"$_TAPESH_ORIG_PROMPT_COMMAND\"; PS1=\"\\[\\e[35m\\]{tag}\\[\\e[0m\\] $_TAPESH_ORIG_PS1\"'\n"
    );
    let rc_path = dir.path().join(".bashrc");
    std::fs::write(&rc_path, content).ok()?;
    Some(PromptSetup {
        args: vec!["--rcfile".into(), rc_path.to_string_lossy().into_owned()],
        env: Vec::new(),
        _rc_dir: Some(dir),
    })
}

fn zsh_setup(tag: &str) -> Option<PromptSetup> {
    let dir = rc_dir()?;
    let home = dirs::home_dir()?;
    let home = home.to_string_lossy();
    // zsh prompts treat % specially.
    let escaped = tag.replace('%', "%%");
    let content = format!(
        "[[ -f \"{home}/.zshrc\" ]] && ZDOTDIR=\"{home}\" source \"{home}/.zshrc\"\n\
         _tapesh_orig_ps1=\"$PS1\"\n\
         _tapesh_precmd() {{ PS1=\"%F{{magenta}}{escaped}%f $_tapesh_orig_ps1\" }}\n\
         precmd_functions=(_tapesh_precmd $precmd_functions)\n"
    );
    std::fs::write(dir.path().join(".zshrc"), content).ok()?;
    Some(PromptSetup {
        args: Vec::new(),
        env: vec![(
            "ZDOTDIR".into(),
            dir.path().to_string_lossy().into_owned(),
        )],
        _rc_dir: Some(dir),
    })
}

fn fish_setup(tag: &str) -> PromptSetup {
    let init = format!(
        "functions -c fish_prompt _tapesh_orig_prompt\n\
         function fish_prompt\n\
         \x20   set_color magenta\n\
         \x20   echo -n '{tag} '\n\
         \x20   set_color normal\n\
         \x20   _tapesh_orig_prompt\n\
         end\n"
    );
    PromptSetup {
        args: vec!["-C".into(), init],
        env: Vec::new(),
        _rc_dir: None,
    }
}

fn posix_setup(tag: &str) -> Option<PromptSetup> {
    let dir = rc_dir()?;
    let content = format!("PS1='\\033[35m{tag}\\033[0m '$PS1\n");
    let rc_path = dir.path().join(".shrc");
    std::fs::write(&rc_path, content).ok()?;
    Some(PromptSetup {
        args: Vec::new(),
        env: vec![("ENV".into(), rc_path.to_string_lossy().into_owned())],
        _rc_dir: Some(dir),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: &str = "[tapesh - ab12cd34]";

    #[test]
    fn bash_uses_rcfile_argument() {
        let setup = setup_prompt("/bin/bash", TAG);
        assert_eq!(setup.args[0], "--rcfile");
        let content = std::fs::read_to_string(&setup.args[1]).unwrap();
        assert!(content.contains(TAG));
        assert!(content.contains("PROMPT_COMMAND"));
        assert!(content.contains("$HOME/.bashrc"));
        assert!(setup.env.is_empty());
    }

    #[test]
    fn zsh_redirects_zdotdir_and_escapes_percent() {
        let setup = setup_prompt("/usr/bin/zsh", "[tapesh - 100% (ab12cd34)]");
        let (key, dir) = &setup.env[0];
        assert_eq!(key, "ZDOTDIR");
        let content = std::fs::read_to_string(Path::new(dir).join(".zshrc")).unwrap();
        assert!(content.contains("100%%"));
        assert!(content.contains("precmd_functions"));
        assert!(setup.args.is_empty());
    }

    #[test]
    fn fish_gets_an_init_snippet() {
        let setup = setup_prompt("/usr/local/bin/fish", TAG);
        assert_eq!(setup.args[0], "-C");
        assert!(setup.args[1].contains("fish_prompt"));
        assert!(setup.args[1].contains(TAG));
        assert!(setup._rc_dir.is_none());
    }

    #[test]
    fn unknown_shell_falls_back_to_env_file() {
        let setup = setup_prompt("/bin/dash", TAG);
        let (key, rc_path) = &setup.env[0];
        assert_eq!(key, "ENV");
        let content = std::fs::read_to_string(rc_path).unwrap();
        assert!(content.starts_with("PS1="));
        assert!(content.contains(TAG));
    }

    #[test]
    fn dropping_the_setup_removes_the_rc_dir() {
        let setup = setup_prompt("/bin/bash", TAG);
        let rc_path = std::path::PathBuf::from(&setup.args[1]);
        assert!(rc_path.exists());
        drop(setup);
        assert!(!rc_path.exists());
    }
}
