//! Console output.
//!
//! Workers report from many tasks at once, so every event goes through a
//! channel to a single printer thread and lines never interleave.

use super::theme::{Theme, format_size};
use crossterm::style::Stylize;
use droidup_core::Reporter;
use std::io::{BufRead, Write};
use std::sync::{OnceLock, mpsc};
use std::thread;
use tokio::sync::oneshot;

#[derive(Debug)]
enum UiEvent {
    Line(String),
    Sync(mpsc::Sender<()>),
}

static PRINTER: OnceLock<mpsc::Sender<UiEvent>> = OnceLock::new();

fn printer() -> mpsc::Sender<UiEvent> {
    PRINTER
        .get_or_init(|| {
            let (sender, receiver) = mpsc::channel::<UiEvent>();
            thread::spawn(move || {
                let stdout = std::io::stdout();
                for event in receiver {
                    match event {
                        UiEvent::Line(line) => {
                            let mut out = stdout.lock();
                            let _ = writeln!(out, "{line}");
                            let _ = out.flush();
                        }
                        UiEvent::Sync(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            });
            sender
        })
        .clone()
}

/// A cloneable handle printing through the shared printer thread.
#[derive(Debug, Clone)]
pub struct Output {
    sender: mpsc::Sender<UiEvent>,
    theme: Theme,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    pub fn new() -> Self {
        Self {
            sender: printer(),
            theme: Theme::default(),
        }
    }

    fn line(&self, line: String) {
        let _ = self.sender.send(UiEvent::Line(line));
    }

    /// Block until everything sent so far is printed.
    pub fn wait(&self) {
        let (tx, rx) = mpsc::channel();
        if self.sender.send(UiEvent::Sync(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// A plain row: label, version and a dimmed detail.
    pub fn row(&self, label: &str, version: &str, detail: &str) {
        self.line(format!(
            "  {}",
            render_row(&self.theme, label, version, detail)
        ));
    }

    /// Ask a yes/no question on the terminal. Anything but `y`/`yes` is no.
    ///
    /// The answer is read on its own thread; dropping the future stops
    /// waiting for it.
    pub async fn confirm(&self, question: &str) -> std::io::Result<bool> {
        self.wait();
        print!("{question} [y/N] ");
        std::io::stdout().flush()?;
        let (tx, rx) = oneshot::channel();
        thread::spawn(move || {
            let mut answer = String::new();
            let read = std::io::stdin()
                .lock()
                .read_line(&mut answer)
                .map(|_| is_yes(&answer));
            let _ = tx.send(read);
        });
        rx.await
            .map_err(|_| std::io::Error::other("terminal reader stopped"))?
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn render_row(theme: &Theme, label: &str, version: &str, detail: &str) -> String {
    // Pad before styling; escape codes would count towards the width.
    let label = format!("{label:<lw$}", lw = theme.label_width);
    let version = format!("{version:<vw$}", vw = theme.version_width);
    format!(
        "{} {} {detail}",
        label.with(theme.colors.label),
        version.with(theme.colors.version)
    )
}

impl Reporter for Output {
    fn section(&self, title: &str) {
        self.line(String::new());
        self.line(format!("{}", title.with(self.theme.colors.header).bold()));
    }

    fn downloading(&self, label: &str, version: &str) {
        let row = render_row(&self.theme, label, version, "downloading");
        self.line(format!(
            "{} {}",
            self.theme.icons.active.with(self.theme.colors.active),
            row.with(self.theme.colors.secondary)
        ));
    }

    fn done(&self, label: &str, version: &str, detail: &str, size: Option<u64>) {
        let detail = match size {
            Some(size) => format!("{detail} ({})", format_size(size)),
            None => detail.to_string(),
        };
        let row = render_row(&self.theme, label, version, &detail);
        self.line(format!(
            "{} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            row
        ));
    }

    fn failed(&self, label: &str, version: &str, reason: &str) {
        let row = render_row(&self.theme, label, version, reason);
        self.line(format!(
            "{} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            row.with(self.theme.colors.error)
        ));
    }

    fn info(&self, msg: &str) {
        self.line(format!("  {} {msg}", self.theme.icons.info));
    }

    fn success(&self, msg: &str) {
        self.line(format!(
            "{} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            msg.with(self.theme.colors.success)
        ));
    }

    fn warning(&self, msg: &str) {
        self.line(format!(
            "{} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        ));
    }

    fn error(&self, msg: &str) {
        self.line(format!(
            "{} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        ));
    }

    fn summary(&self, done: usize, total: usize, action: &str) {
        let msg = format!("{action} {done} / {total}");
        if done == total {
            self.success(&msg);
        } else {
            self.warning(&msg);
        }
    }
}
