use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn combined_output(output: &Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn auto_accept() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_auto-accept"));
    cmd.env_remove("AUTO_ACCEPT_DEBUG")
        .env_remove("AUTO_ACCEPT_CONFIG")
        .env_remove("AUTO_ACCEPT_LOG");
    cmd
}

/// Run to completion, killing the supervisor if it outlives `limit`.
fn output_within(mut cmd: Command, limit: Duration) -> Output {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn auto-accept");
    let deadline = Instant::now() + limit;
    loop {
        if child.try_wait().expect("poll auto-accept").is_some() {
            break;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    child.wait_with_output().expect("collect auto-accept output")
}

#[test]
fn missing_command_is_a_usage_error() {
    let output = auto_accept().output().expect("run auto-accept");
    assert_eq!(output.status.code(), Some(1));
    let combined = combined_output(&output);
    assert!(combined.contains("Usage"), "{combined}");
}

#[test]
fn help_exits_cleanly() {
    let output = auto_accept().arg("--help").output().expect("run auto-accept --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("auto-accept"));
    assert!(combined.contains("--accept-delay-secs"));
}

#[test]
fn child_exit_code_is_propagated() {
    let output = auto_accept()
        .args(["sh", "-c", "exit 3"])
        .output()
        .expect("run auto-accept");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn child_killed_by_signal_maps_to_128_plus_signal() {
    let output = auto_accept()
        .args(["sh", "-c", "kill -TERM $$"])
        .output()
        .expect("run auto-accept");
    assert_eq!(output.status.code(), Some(143));
}

#[test]
fn unknown_program_exits_127() {
    let output = auto_accept()
        .arg("auto-accept-definitely-not-a-command")
        .output()
        .expect("run auto-accept");
    assert_eq!(output.status.code(), Some(127));
    assert!(combined_output(&output).contains("failed to exec"));
}

#[test]
fn child_output_passes_through_unchanged() {
    let output = auto_accept()
        .args(["printf", "hello"])
        .output()
        .expect("run auto-accept");
    assert!(output.status.success());
    assert_eq!(output.stdout, b"hello");
}

#[test]
fn flags_after_the_command_belong_to_the_child() {
    let output = auto_accept()
        .args(["printf", "[%s]", "--debug"])
        .output()
        .expect("run auto-accept");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "[--debug]");
}

#[test]
fn prompt_is_accepted_end_to_end() {
    let mut cmd = auto_accept();
    cmd.args([
        "--accept-delay-secs",
        "0",
        "--redraw-delay-ms",
        "50",
        "sh",
        "-c",
        r#"printf 'Do you want to proceed? needs your approval\n'; read answer; printf 'answer:[%s]' "$answer""#,
    ]);
    let output = output_within(cmd, Duration::from_secs(20));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("answer:[]"), "{stdout:?}");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn countdown_shows_in_title_unless_disabled() {
    let script = r#"printf 'Yes, clear context\n'; read answer; printf done"#;

    let mut shown = auto_accept();
    shown.args(["--accept-delay-secs", "1", "--redraw-delay-ms", "50", "sh", "-c", script]);
    let output = output_within(shown, Duration::from_secs(20));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\x1b]0;auto-accept: accepting in 1s\x07"), "{stdout:?}");
    assert!(stdout.contains("\x1b]0;\x07"));
    assert!(stdout.ends_with("done"));

    let mut hidden = auto_accept();
    hidden.args([
        "--no-countdown",
        "--accept-delay-secs",
        "1",
        "--redraw-delay-ms",
        "50",
        "sh",
        "-c",
        script,
    ]);
    let output = output_within(hidden, Duration::from_secs(20));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("\x1b]0;"), "{stdout:?}");
    assert!(stdout.ends_with("done"));
}

#[test]
fn custom_trigger_replaces_defaults() {
    let mut cmd = auto_accept();
    cmd.args([
        "--trigger",
        "Continue?",
        "--accept-delay-secs",
        "0",
        "--redraw-delay-ms",
        "50",
        "sh",
        "-c",
        r#"printf 'Continue? '; read answer; printf 'went on'"#,
    ]);
    let output = output_within(cmd, Duration::from_secs(20));
    assert!(String::from_utf8_lossy(&output.stdout).contains("went on"));
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn unreadable_config_file_is_reported() {
    let output = auto_accept()
        .args(["--config", "/nonexistent/auto-accept.json", "true"])
        .output()
        .expect("run auto-accept");
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("failed to read config file"));
}

#[test]
fn debug_env_writes_log_file() {
    let log_path = std::env::temp_dir().join(format!(
        "auto_accept_cli_debug_{}.log",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&log_path);
    let output = auto_accept()
        .env("AUTO_ACCEPT_DEBUG", "1")
        .env("AUTO_ACCEPT_LOG", &log_path)
        .arg("true")
        .output()
        .expect("run auto-accept");
    assert!(output.status.success());
    let log = std::fs::read_to_string(&log_path).expect("log file written");
    assert!(log.contains("auto-accept started"), "{log}");
    let _ = std::fs::remove_file(&log_path);
}

#[test]
fn piped_stdin_reaches_the_child() {
    use std::io::Write;

    let mut child = auto_accept()
        .args(["sh", "-c", r#"read line; printf '<%s>' "$line""#])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn auto-accept");
    child
        .stdin
        .take()
        .expect("stdin pipe")
        .write_all(b"hello\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("collect output");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("<hello>"));
}

mod on_a_terminal {
    use super::auto_accept;
    use std::os::unix::io::{FromRawFd, RawFd};
    use std::process::{Child, ExitStatus, Stdio};
    use std::thread;
    use std::time::{Duration, Instant};

    struct Terminal {
        master: RawFd,
        slave: RawFd,
    }

    impl Terminal {
        fn open() -> Self {
            let mut master = -1;
            let mut slave = -1;
            let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
            ws.ws_row = 24;
            ws.ws_col = 80;
            let rc = unsafe {
                libc::openpty(
                    &mut master,
                    &mut slave,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &mut ws,
                )
            };
            assert_eq!(rc, 0, "openpty failed");
            for fd in [master, slave] {
                unsafe {
                    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                }
            }
            unsafe {
                let flags = libc::fcntl(master, libc::F_GETFL);
                libc::fcntl(master, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
            Self { master, slave }
        }

        fn stdio(&self) -> Stdio {
            let fd = unsafe { libc::fcntl(self.slave, libc::F_DUPFD_CLOEXEC, 0) };
            assert!(fd >= 0, "dup of terminal failed");
            unsafe { Stdio::from_raw_fd(fd) }
        }

        fn mode(&self) -> libc::termios {
            let mut termios: libc::termios = unsafe { std::mem::zeroed() };
            assert_eq!(unsafe { libc::tcgetattr(self.slave, &mut termios) }, 0);
            termios
        }

        /// Discard whatever the supervisor has drawn so far.
        fn drain(&self) {
            let mut buf = [0u8; 4096];
            loop {
                let n = unsafe { libc::read(self.master, buf.as_mut_ptr() as *mut _, buf.len()) };
                if n <= 0 {
                    break;
                }
            }
        }

        fn spawn(&self, args: &[&str]) -> Child {
            auto_accept()
                .args(args)
                .stdin(self.stdio())
                .stdout(self.stdio())
                .stderr(Stdio::null())
                .spawn()
                .expect("spawn auto-accept on a terminal")
        }

        fn wait(&self, child: &mut Child, limit: Duration) -> ExitStatus {
            let deadline = Instant::now() + limit;
            loop {
                self.drain();
                if let Some(status) = child.try_wait().expect("poll auto-accept") {
                    return status;
                }
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    return child.wait().expect("reap auto-accept");
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }

    impl Drop for Terminal {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.master);
                libc::close(self.slave);
            }
        }
    }

    fn same_mode(a: &libc::termios, b: &libc::termios) -> bool {
        a.c_iflag == b.c_iflag
            && a.c_oflag == b.c_oflag
            && a.c_cflag == b.c_cflag
            && a.c_lflag == b.c_lflag
            && a.c_cc == b.c_cc
    }

    #[test]
    fn terminal_mode_restored_after_normal_exit() {
        let term = Terminal::open();
        let before = term.mode();
        let mut child = term.spawn(&["sh", "-c", "exit 3"]);
        let status = term.wait(&mut child, Duration::from_secs(15));
        assert_eq!(status.code(), Some(3));
        assert!(same_mode(&before, &term.mode()));
    }

    #[test]
    fn terminal_mode_restored_after_child_is_killed() {
        let term = Terminal::open();
        let before = term.mode();
        let mut child = term.spawn(&["sh", "-c", "kill -TERM $$"]);
        let status = term.wait(&mut child, Duration::from_secs(15));
        assert_eq!(status.code(), Some(143));
        assert!(same_mode(&before, &term.mode()));
    }

    #[test]
    fn terminal_mode_restored_after_interrupt() {
        let term = Terminal::open();
        let before = term.mode();
        let mut child = term.spawn(&["sleep", "5"]);
        thread::sleep(Duration::from_millis(500));
        term.drain();
        assert_eq!(term.mode().c_lflag & libc::ICANON, 0, "raw mode while supervising");
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGINT);
        }
        let status = term.wait(&mut child, Duration::from_secs(15));
        assert_eq!(status.code(), Some(128 + libc::SIGINT));
        assert!(same_mode(&before, &term.mode()));
    }
}
