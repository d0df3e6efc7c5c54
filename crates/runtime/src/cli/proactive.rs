use chrono::{DateTime, Utc};
use parley_domain::config::Settings;

use crate::proactive::{plan_assistant, IdleSignals};

/// One line per enabled assistant: name, id and next fire time (or
/// "not idle").
pub fn plan_lines(settings: &Settings, signals: &IdleSignals, now: DateTime<Utc>) -> Vec<String> {
    settings
        .assistants
        .iter()
        .filter(|a| a.proactive.enabled)
        .map(|a| {
            let next = match plan_assistant(settings, a, signals, now) {
                Some(t) if t <= now => format!("due now ({})", t.to_rfc3339()),
                Some(t) => t.to_rfc3339(),
                None => "not idle".to_owned(),
            };
            format!("{} ({}): {next}", a.name, a.id)
        })
        .collect()
}

pub fn plan(settings: &Settings, signals: &IdleSignals, now: DateTime<Utc>) {
    let lines = plan_lines(settings, signals, now);
    if lines.is_empty() {
        println!("No assistant has proactive messaging enabled.");
        return;
    }
    for line in lines {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parley_domain::config::AssistantSetting;

    #[test]
    fn plan_reports_idle_and_active_assistants() {
        let mut ada = AssistantSetting::new("Ada");
        ada.proactive.enabled = true;
        ada.proactive.prompt = "Check in".into();
        ada.proactive.interval_minutes = 30;
        let mut off = AssistantSetting::new("Off");
        off.proactive.enabled = false;
        let settings = Settings {
            assistants: vec![ada, off],
            ..Settings::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();

        let idle = IdleSignals {
            last_conversation_done_at: Some(now - chrono::Duration::hours(2)),
            ..IdleSignals::default()
        };
        let lines = plan_lines(&settings, &idle, now);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Ada ("));
        assert!(lines[0].contains("due now"));

        let active = IdleSignals {
            last_conversation_done_at: Some(now - chrono::Duration::hours(2)),
            last_user_message_at: Some(now - chrono::Duration::minutes(1)),
            ..IdleSignals::default()
        };
        assert!(plan_lines(&settings, &active, now)[0].ends_with("not idle"));
    }
}
