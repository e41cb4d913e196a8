use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use apexd_session::{Session, SessionState};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal())
}

pub(crate) fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// `[OK] message` in rich mode, the bare message otherwise.
pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.to_ascii_uppercase()),
    }
}

fn state_style(state: SessionState) -> Style {
    let color = match state {
        SessionState::Success | SessionState::Activated => AnsiColor::BrightGreen,
        SessionState::Verified | SessionState::Staged => AnsiColor::BrightCyan,
        SessionState::RollbackInProgress | SessionState::Reverted => AnsiColor::BrightYellow,
        SessionState::ActivationFailed | SessionState::RevertFailed => AnsiColor::BrightRed,
        SessionState::Unknown => AnsiColor::BrightBlack,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

pub(crate) fn render_state(style: OutputStyle, state: SessionState) -> String {
    match style {
        OutputStyle::Plain => state.as_str().to_string(),
        OutputStyle::Rich => colorize(state_style(state), state.as_str()),
    }
}

/// One line per session: id, state and the packages it covers.
pub(crate) fn format_session_line(style: OutputStyle, session: &Session) -> String {
    let packages = if session.package_names().is_empty() {
        "-".to_string()
    } else {
        session.package_names().join(",")
    };
    format!(
        "{}\t{}\t{}",
        session.id(),
        render_state(style, session.state()),
        packages
    )
}

pub(crate) fn format_session_details(style: OutputStyle, session: &Session) -> Vec<String> {
    let children = session
        .child_session_ids()
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let mut lines = vec![
        format!("id: {}", session.id()),
        format!("state: {}", render_state(style, session.state())),
        format!("dir: {}", session.session_dir().display()),
        format!("packages: {}", session.package_names().join(",")),
        format!("child sessions: {children}"),
        format!("build fingerprint: {}", session.build_fingerprint()),
        format!("rollback enabled: {}", session.has_rollback_enabled()),
        format!("is rollback: {}", session.is_rollback()),
        format!("rollback id: {}", session.rollback_id()),
    ];
    if !session.error_message().is_empty() {
        lines.push(format!("error: {}", session.error_message()));
    }
    if !session.crashing_native_process().is_empty() {
        lines.push(format!(
            "crashing native process: {}",
            session.crashing_native_process()
        ));
    }
    lines
}

/// Spinner shown while a long blocking step runs; silent in plain mode.
pub(crate) struct Spinner {
    progress_bar: Option<ProgressBar>,
}

impl Spinner {
    pub(crate) fn start(style: OutputStyle, message: &str) -> Self {
        let progress_bar = (style == OutputStyle::Rich).then(|| {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg}") {
                progress_bar.set_style(template.tick_chars("|/-\\ "));
            }
            progress_bar.set_message(message.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        });
        Self { progress_bar }
    }

    pub(crate) fn finish(mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.clear();
    }
}
