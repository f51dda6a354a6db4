//! Placeholder substitution for follow-up and reminder bodies.

use crate::model::{Appointment, Lead, ReminderKind};

/// Built-in reminder bodies used when no active reminder template exists.
pub fn default_reminder_body(kind: ReminderKind) -> &'static str {
    match kind {
        ReminderKind::DayBefore => {
            "Hi {name}, a reminder that your {consultation_type} is tomorrow, \
             {appointment_date} at {appointment_time}."
        }
        ReminderKind::TwoHoursBefore => {
            "Hi {name}, your {consultation_type} starts in 2 hours at {appointment_time}."
        }
    }
}

/// Replace `{key}` placeholders. Unknown placeholders stay verbatim.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render a follow-up body for a lead.
pub fn render_follow_up(template: &str, lead: &Lead) -> String {
    render(
        template,
        &[
            ("name", lead.display_name()),
            ("phone", &lead.phone_number),
            ("stage", lead.current_stage.as_str()),
        ],
    )
}

/// Render a reminder body for an appointment.
pub fn render_reminder(template: &str, appointment: &Appointment) -> String {
    let name = appointment
        .customer_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("there");
    let date = appointment.appointment_date.format("%A %-d %B").to_string();
    let time = appointment.appointment_date.format("%H:%M").to_string();
    let consultation = appointment
        .consultation_type
        .as_deref()
        .unwrap_or("consultation");
    render(
        template,
        &[
            ("name", name),
            ("appointment_date", &date),
            ("appointment_time", &time),
            ("consultation_type", consultation),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppointmentStatus, LeadAttributes};
    use crate::stage::Stage;
    use chrono::{TimeZone, Utc};

    fn lead(name: Option<&str>) -> Lead {
        Lead {
            phone_number: "+353871234567".into(),
            name: name.map(String::from),
            current_stage: Stage::Budget,
            is_qualified: false,
            is_interested: false,
            is_disqualified: false,
            disqualification_reason: None,
            angry_behaviour_detected: false,
            total_messages_sent: 0,
            response_count: 0,
            last_message_time: None,
            last_response_time: None,
            last_stage_update: None,
            manual_stop_followups: false,
            follow_up_enabled: true,
            appointment_booked: false,
            appointment_event_id: None,
            booking_confirmed_at: None,
            attributes: LeadAttributes::default(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_known_and_unknown() {
        let out = render("Hi {name}, {unknown} {name}!", &[("name", "Aoife")]);
        assert_eq!(out, "Hi Aoife, {unknown} Aoife!");
    }

    #[test]
    fn test_render_unclosed_brace() {
        assert_eq!(render("Hi {name", &[("name", "x")]), "Hi {name");
        assert_eq!(render("no placeholders", &[]), "no placeholders");
    }

    #[test]
    fn test_render_follow_up_name_fallback() {
        let body = "Hi {name}, still thinking about the {stage}?";
        assert_eq!(
            render_follow_up(body, &lead(Some("Sean"))),
            "Hi Sean, still thinking about the budget?"
        );
        assert_eq!(
            render_follow_up(body, &lead(Some("  "))),
            "Hi there, still thinking about the budget?"
        );
        assert_eq!(
            render_follow_up("{phone}", &lead(None)),
            "+353871234567"
        );
    }

    #[test]
    fn test_render_reminder() {
        let appt = Appointment {
            id: "a1".into(),
            customer_phone: "+353871234567".into(),
            customer_name: Some("Niamh".into()),
            customer_email: None,
            appointment_date: Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
            consultation_type: None,
            event_id: None,
            status: AppointmentStatus::Booked,
            reminder_24h_scheduled: None,
            reminder_24h_sent: false,
            reminder_2h_scheduled: None,
            reminder_2h_sent: false,
        };
        let out = render_reminder(default_reminder_body(ReminderKind::DayBefore), &appt);
        assert_eq!(
            out,
            "Hi Niamh, a reminder that your consultation is tomorrow, Thursday 1 February at 10:00."
        );
    }
}
