//! Formatting of job reports in the HTML subset Telegram renders

use chrono::{DateTime, Local};
use std::fmt::Display;
use std::time::Duration;

/// Environment variable set per process by distributed launchers.
pub const RANK_ENV: &str = "RANK";

const SEPARATOR: &str = "____________________________";

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn title(text: &str) -> String {
    format!("<b>{}</b>\n", text)
}

pub fn subtitle(text: &str) -> String {
    format!("<b>{}</b>", text)
}

/// `key: value` line with the value escaped and monospaced.
pub fn pair(key: &str, value: impl Display) -> String {
    format!("<i>{}:</i> <code>{}</code>", key, escape_html(&value.to_string()))
}

pub fn codeblock(text: &str) -> String {
    format!("<pre>{}\n</pre>\n", escape_html(text))
}

pub fn format_date(date: &DateTime<Local>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `H:MM:SS` rendering of a duration.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Host name of this machine, or "unknown" when the OS will not say.
pub fn hostname() -> String {
    ::hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Notifications describing the lifecycle of one watched job.
#[derive(Debug, Clone)]
pub struct RunReport {
    hostname: String,
    command: String,
    started_at: DateTime<Local>,
    rank: Option<String>,
}

impl RunReport {
    /// Describe `command` starting now on this machine.
    pub fn start_now(command: &[String]) -> Self {
        Self::new(
            hostname(),
            command.join(" "),
            Local::now(),
            std::env::var(RANK_ENV).ok().filter(|r| !r.trim().is_empty()),
        )
    }

    pub fn new(
        hostname: String,
        command: String,
        started_at: DateTime<Local>,
        rank: Option<String>,
    ) -> Self {
        Self {
            hostname,
            command,
            started_at,
            rank,
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Only the rank 0 process of a distributed job reports start and completion.
    pub fn is_primary(&self) -> bool {
        match &self.rank {
            None => true,
            Some(rank) => rank.trim().parse::<i64>().map(|r| r == 0).unwrap_or(false),
        }
    }

    fn base_info(&self) -> Vec<String> {
        let host = match &self.rank {
            Some(rank) => format!("{} - RANK: {}", self.hostname, rank),
            None => self.hostname.clone(),
        };
        vec![
            pair("Machine hostname", host),
            pair("Command", &self.command),
            pair("Starting date", format_date(&self.started_at)),
        ]
    }

    fn elapsed(&self, ended_at: &DateTime<Local>) -> Duration {
        (*ended_at - self.started_at).to_std().unwrap_or_default()
    }

    pub fn started(&self) -> String {
        let mut lines = vec![title(SEPARATOR), title("Your job has started 🎬")];
        lines.extend(self.base_info());
        lines.join("\n")
    }

    pub fn completed(&self, ended_at: DateTime<Local>, exit_status: &str) -> String {
        let mut lines = vec![title(SEPARATOR), title("Your job is complete 🎉")];
        lines.extend(self.base_info());
        lines.push(pair("End date", format_date(&ended_at)));
        lines.push(pair("Job duration", format_duration(self.elapsed(&ended_at))));
        lines.push(pair("Exit status", exit_status));
        lines.join("\n")
    }

    pub fn crashed(&self, ended_at: DateTime<Local>, error: &str, stderr_tail: &str) -> String {
        let mut lines = vec![title(SEPARATOR), title("Your job has crashed ☠️")];
        lines.extend(self.base_info());
        lines.push(pair("Crash date", format_date(&ended_at)));
        lines.push(pair(
            "Crashed job duration",
            format_duration(self.elapsed(&ended_at)),
        ));
        lines.push(subtitle("Here's the error:"));
        lines.push(codeblock(error));
        if !stderr_tail.trim().is_empty() {
            lines.push(subtitle("Last stderr lines:"));
            lines.push(codeblock(stderr_tail));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(rank: Option<&str>) -> RunReport {
        RunReport::new(
            "gpu-box".to_string(),
            "python train.py --epochs 3".to_string(),
            Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            rank.map(str::to_string),
        )
    }

    #[test]
    fn test_html_helpers() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
        assert_eq!(title("Done"), "<b>Done</b>\n");
        assert_eq!(subtitle("Done"), "<b>Done</b>");
        assert_eq!(pair("Exit", "<1>"), "<i>Exit:</i> <code>&lt;1&gt;</code>");
        assert_eq!(codeblock("x<y"), "<pre>x&lt;y\n</pre>\n");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "25:00:00");
    }

    #[test]
    fn test_started_report() {
        let text = report(None).started();
        assert!(text.contains("Your job has started"));
        assert!(text.contains("<i>Machine hostname:</i> <code>gpu-box</code>"));
        assert!(text.contains("<code>python train.py --epochs 3</code>"));
        assert!(text.contains("<code>2024-05-01 12:00:00</code>"));
    }

    #[test]
    fn test_completed_report_includes_duration() {
        let report = report(None);
        let ended = report.started_at() + chrono::Duration::seconds(125);
        let text = report.completed(ended, "exit status: 0");
        assert!(text.contains("Your job is complete"));
        assert!(text.contains("<code>0:02:05</code>"));
        assert!(text.contains("<code>exit status: 0</code>"));
    }

    #[test]
    fn test_crashed_report_escapes_error() {
        let report = report(None);
        let text = report.crashed(report.started_at(), "exit status: 1", "KeyError: <lr>\n");
        assert!(text.contains("Your job has crashed"));
        assert!(text.contains("<pre>exit status: 1\n</pre>"));
        assert!(text.contains("KeyError: &lt;lr&gt;"));

        let quiet = report.crashed(report.started_at(), "killed", "  ");
        assert!(!quiet.contains("Last stderr lines"));
    }

    #[test]
    fn test_hostname_comes_from_the_os() {
        let name = hostname();
        assert!(!name.trim().is_empty());
        assert_ne!(name, "unknown");
    }

    #[test]
    fn test_rank_handling() {
        assert!(report(None).is_primary());
        assert!(report(Some("0")).is_primary());
        assert!(!report(Some("3")).is_primary());
        assert!(report(Some("3")).started().contains("gpu-box - RANK: 3"));
    }
}
