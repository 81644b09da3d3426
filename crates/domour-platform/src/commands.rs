use std::process::Stdio;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keeps child processes spawned from the desktop app from flashing a console
/// window on Windows. No-op elsewhere.
pub trait HideWindow {
    fn hide_window(&mut self) -> &mut Self;

    /// Hidden window and no inherited stdin, for long-running helpers that
    /// must not compete with the host for terminal input.
    fn background(&mut self) -> &mut Self;
}

impl HideWindow for tokio::process::Command {
    #[cfg(windows)]
    fn hide_window(&mut self) -> &mut Self {
        self.creation_flags(CREATE_NO_WINDOW)
    }

    #[cfg(not(windows))]
    fn hide_window(&mut self) -> &mut Self {
        self
    }

    fn background(&mut self) -> &mut Self {
        self.hide_window().stdin(Stdio::null())
    }
}

impl HideWindow for std::process::Command {
    #[cfg(windows)]
    fn hide_window(&mut self) -> &mut Self {
        self.creation_flags(CREATE_NO_WINDOW)
    }

    #[cfg(not(windows))]
    fn hide_window(&mut self) -> &mut Self {
        self
    }

    fn background(&mut self) -> &mut Self {
        self.hide_window().stdin(Stdio::null())
    }
}

#[cfg(test)]
mod tests {
    use super::HideWindow;

    #[test]
    fn tokio_command_background_is_chainable() {
        let mut cmd = tokio::process::Command::new("vlink");
        let before = &raw mut cmd;
        let after = std::ptr::from_mut(cmd.background());
        assert_eq!(before, after);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_command_sees_closed_stdin() {
        let output = tokio::process::Command::new("sh")
            .args(["-c", "cat; echo done"])
            .background()
            .output()
            .await
            .expect("sh should run");

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "done\n");
    }
}
