/// Message rendering
///
/// Every notification is produced from a [`Template`] and a
/// [`RenderContext`]. The renderer is a trait so deployments can swap the
/// wording; [`BuiltinRenderer`] carries the stock messages.
///
/// Reminder templates always produce an HTML alternative next to the text
/// body. The other templates are text only.

use crate::circles::MembershipKind;
use crate::dispatch::OutboundMessage;
use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc};
use rallypoint_shared::models::{Attendance, Event};
use std::fmt;

/// Render error types
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The context lacks a field the template needs
    #[error("Template {template} needs {field}")]
    MissingField {
        template: Template,
        field: &'static str,
    },
}

/// Render result type alias
pub type RenderResult<T> = Result<T, RenderError>;

/// Notification templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    /// A conditional attendee's threshold was met
    CommitmentReached,

    /// Signup confirmation, sent with the calendar invite
    RsvpConfirmation,

    /// Reminder roughly one day ahead
    ReminderNextDay,

    /// Reminder shortly before the start
    ReminderStartingSoon,

    /// Someone joined, or asked to join, a circle
    CircleMembership,

    /// Website contact message forwarded to the outreach circle
    OutreachContact,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Template::CommitmentReached => write!(f, "commitment_reached"),
            Template::RsvpConfirmation => write!(f, "rsvp_confirmation"),
            Template::ReminderNextDay => write!(f, "reminder_next_day"),
            Template::ReminderStartingSoon => write!(f, "reminder_starting_soon"),
            Template::CircleMembership => write!(f, "circle_membership"),
            Template::OutreachContact => write!(f, "outreach_contact"),
        }
    }
}

/// Values a template can draw on
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub event: Option<Event>,
    pub event_url: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_first_name: Option<String>,
    pub mutual_commitment: i32,
    pub circle_name: Option<String>,
    pub circle_url: Option<String>,
    pub member_name: Option<String>,
    pub member_email: Option<String>,
    pub membership: Option<MembershipKind>,
    pub sender: Option<String>,
    pub message: Option<String>,
}

impl RenderContext {
    /// Context for an event notification
    pub fn for_event(event: &Event, event_url: &str) -> Self {
        RenderContext {
            event: Some(event.clone()),
            event_url: Some(event_url.to_string()),
            ..Default::default()
        }
    }

    /// Adds the attendee being addressed
    pub fn recipient(mut self, attendance: &Attendance) -> Self {
        self.recipient_name = Some(attendance.full_name());
        self.recipient_first_name = Some(attendance.first_name.clone());
        self.mutual_commitment = attendance.attendee.mutual_commitment;
        self
    }

    /// Context for a circle membership notice
    pub fn for_circle(
        circle_name: &str,
        circle_url: &str,
        member_name: &str,
        member_email: &str,
        kind: MembershipKind,
    ) -> Self {
        RenderContext {
            circle_name: Some(circle_name.to_string()),
            circle_url: Some(circle_url.to_string()),
            member_name: Some(member_name.to_string()),
            member_email: Some(member_email.to_string()),
            membership: Some(kind),
            ..Default::default()
        }
    }

    /// Context for a forwarded contact-form message
    pub fn for_outreach(sender: &str, message: &str) -> Self {
        RenderContext {
            sender: Some(sender.to_string()),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Rendered subject and bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

impl RenderedMessage {
    /// Addresses the rendered message
    pub fn into_message(self, from: &str, to: Vec<String>) -> OutboundMessage {
        let message = OutboundMessage::new(self.subject, self.text, from, to);
        match self.html {
            Some(html) => message.with_html(html),
            None => message,
        }
    }
}

/// Turns templates into messages
pub trait MessageRenderer: Send + Sync {
    fn render(&self, template: Template, context: &RenderContext) -> RenderResult<RenderedMessage>;
}

/// Stock message wording
#[derive(Debug, Clone)]
pub struct BuiltinRenderer {
    /// Prepended to every subject, e.g. `[XR]`
    pub subject_tag: String,

    /// Signature line
    pub organization: String,

    /// Address people can reply to with questions
    pub contact_email: String,

    /// Offset used to display event times
    pub offset: FixedOffset,
}

impl Default for BuiltinRenderer {
    fn default() -> Self {
        BuiltinRenderer {
            subject_tag: "[XR]".to_string(),
            organization: "Rallypoint".to_string(),
            contact_email: "info@example.org".to_string(),
            offset: Utc.fix(),
        }
    }
}

/// Formats an instant as `Friday, May 3rd @ 6:30PM`
pub fn format_when(at: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = at.with_timezone(&offset);
    let day = local.day();
    format!(
        "{}, {} {}{} @ {}",
        local.format("%A"),
        local.format("%B"),
        day,
        ordinal_suffix(day),
        local.format("%-I:%M%p"),
    )
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// Minimal HTML escaping for text interpolated into reminder bodies
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn require<'a, T>(
    value: &'a Option<T>,
    template: Template,
    field: &'static str,
) -> RenderResult<&'a T> {
    value
        .as_ref()
        .ok_or(RenderError::MissingField { template, field })
}

impl BuiltinRenderer {
    fn subject(&self, text: &str) -> String {
        format!("{} {}", self.subject_tag, text)
    }

    fn commitment(&self, ctx: &RenderContext) -> RenderResult<RenderedMessage> {
        let template = Template::CommitmentReached;
        let event = require(&ctx.event, template, "event")?;
        let url = require(&ctx.event_url, template, "event_url")?;
        let name = require(&ctx.recipient_name, template, "recipient_name")?;

        let text = format!(
            "\nHi {name},\n\n\
             You said you'd commit to attending \"{title}\" if at least {num} people also committed.\n\
             We've now got enough other folks to commit! We hope to see you there, on {when}.\n\
             More details here: {url}\n\n\
             Solidarity,\n{org}\n\n\
             P.S. If you can't make it, please get in touch. We're all in this together.\n\n",
            title = event.name,
            num = ctx.mutual_commitment,
            when = format_when(event.starts_at, self.offset),
            org = self.organization,
        );

        Ok(RenderedMessage {
            subject: self.subject(&format!("We've got enough to commit to {}", event.name)),
            text,
            html: None,
        })
    }

    fn rsvp(&self, ctx: &RenderContext) -> RenderResult<RenderedMessage> {
        let template = Template::RsvpConfirmation;
        let event = require(&ctx.event, template, "event")?;
        let url = require(&ctx.event_url, template, "event_url")?;
        let name = require(&ctx.recipient_first_name, template, "recipient_first_name")?;

        let text = format!(
            "\nHi {name},\n\n\
             Thank you for signing up for \"{title}\"! We're looking forward to seeing you at\n\
             the event on {when}.\n\n\
             See event details here: {url}\n\n\
             In Solidarity,\n{org}\n",
            title = event.name,
            when = format_when(event.starts_at, self.offset),
            org = self.organization,
        );

        Ok(RenderedMessage {
            subject: self.subject(&format!("RSVP confirmation for {}", event.name)),
            text,
            html: None,
        })
    }

    fn reminder(&self, template: Template, ctx: &RenderContext) -> RenderResult<RenderedMessage> {
        let event = require(&ctx.event, template, "event")?;
        let url = require(&ctx.event_url, template, "event_url")?;
        let name = require(&ctx.recipient_first_name, template, "recipient_first_name")?;
        let title = event.text_title();
        let when = format_when(event.starts_at, self.offset);

        let (subject, lead) = if template == Template::ReminderNextDay {
            (
                format!("Reminder: {} is tomorrow", title),
                format!("This is a reminder that \"{}\" is coming up tomorrow, {}.", title, when),
            )
        } else {
            (
                format!("Starting soon: {}", title),
                format!("\"{}\" starts soon, at {}.", title, when),
            )
        };
        let location = if event.is_virtual {
            "This event is online; the link is on the event page.".to_string()
        } else if event.location.is_empty() {
            String::new()
        } else {
            format!("Location: {}", event.location)
        };

        let mut text = format!("Hi {},\n\n{}\n", name, lead);
        if !location.is_empty() {
            text.push_str(&format!("{}\n", location));
        }
        text.push_str(&format!(
            "\nEvent details: {}\n\n\
             Questions? Write to {}.\n\n\
             Solidarity,\n{}\n",
            url, self.contact_email, self.organization
        ));

        let mut html = format!(
            "<p>Hi {},</p>\n<p>{}</p>\n",
            escape_html(name),
            escape_html(&lead)
        );
        if !location.is_empty() {
            html.push_str(&format!("<p>{}</p>\n", escape_html(&location)));
        }
        html.push_str(&format!(
            "<p><a href=\"{url}\">Event details</a></p>\n\
             <p>Questions? Write to <a href=\"mailto:{contact}\">{contact}</a>.</p>\n\
             <p>Solidarity,<br>{org}</p>\n",
            url = escape_html(url),
            contact = escape_html(&self.contact_email),
            org = escape_html(&self.organization),
        ));

        Ok(RenderedMessage {
            subject: self.subject(&subject),
            text,
            html: Some(html),
        })
    }

    fn membership(&self, ctx: &RenderContext) -> RenderResult<RenderedMessage> {
        let template = Template::CircleMembership;
        let circle = require(&ctx.circle_name, template, "circle_name")?;
        let url = require(&ctx.circle_url, template, "circle_url")?;
        let member = require(&ctx.member_name, template, "member_name")?;
        let email = require(&ctx.member_email, template, "member_email")?;
        let kind = require(&ctx.membership, template, "membership")?;

        Ok(RenderedMessage {
            subject: self.subject(&format!("{} added to {}", kind.label(), circle)),
            text: format!(
                "\n{} <{}> {} {}\n\n{}#members\n",
                member,
                email,
                kind.action(),
                circle,
                url
            ),
            html: None,
        })
    }

    fn outreach(&self, ctx: &RenderContext) -> RenderResult<RenderedMessage> {
        let template = Template::OutreachContact;
        let sender = require(&ctx.sender, template, "sender")?;
        let message = require(&ctx.message, template, "message")?;

        Ok(RenderedMessage {
            subject: self.subject(&format!("Website Contact from {}", sender)),
            text: message.clone(),
            html: None,
        })
    }
}

impl MessageRenderer for BuiltinRenderer {
    fn render(&self, template: Template, context: &RenderContext) -> RenderResult<RenderedMessage> {
        match template {
            Template::CommitmentReached => self.commitment(context),
            Template::RsvpConfirmation => self.rsvp(context),
            Template::ReminderNextDay | Template::ReminderStartingSoon => {
                self.reminder(template, context)
            }
            Template::CircleMembership => self.membership(context),
            Template::OutreachContact => self.outreach(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rallypoint_shared::models::{Attendee, CreateEvent};
    use uuid::Uuid;

    fn event() -> Event {
        let starts_at = Utc.with_ymd_and_hms(2030, 5, 3, 22, 30, 0).unwrap();
        CreateEvent::new("Climate Strike", "climate-strike", starts_at).into_event(Utc::now())
    }

    fn attendance(mutual_commitment: i32) -> Attendance {
        Attendance {
            attendee: Attendee {
                id: Uuid::new_v4(),
                event_id: Uuid::new_v4(),
                contact_id: Uuid::new_v4(),
                role: String::new(),
                promised: None,
                notes: String::new(),
                mutual_commitment,
                notified: None,
                created_at: Utc::now(),
            },
            email: "ada@example.org".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    fn renderer() -> BuiltinRenderer {
        BuiltinRenderer {
            organization: "Extinction Rebellion Massachusetts".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_when() {
        let at = Utc.with_ymd_and_hms(2030, 5, 3, 22, 30, 0).unwrap();
        assert_eq!(format_when(at, Utc.fix()), "Friday, May 3rd @ 10:30PM");

        let boston = FixedOffset::west_opt(4 * 3600).unwrap();
        assert_eq!(format_when(at, boston), "Friday, May 3rd @ 6:30PM");
    }

    #[test]
    fn test_ordinal_suffix() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(12), "th");
        assert_eq!(ordinal_suffix(13), "th");
        assert_eq!(ordinal_suffix(21), "st");
        assert_eq!(ordinal_suffix(23), "rd");
        assert_eq!(ordinal_suffix(30), "th");
    }

    #[test]
    fn test_commitment_message() {
        let event = event();
        let ctx = RenderContext::for_event(&event, "https://example.org/action/climate-strike")
            .recipient(&attendance(5));
        let rendered = renderer().render(Template::CommitmentReached, &ctx).unwrap();

        assert_eq!(rendered.subject, "[XR] We've got enough to commit to Climate Strike");
        assert!(rendered.text.contains("Hi Ada Lovelace,"));
        assert!(rendered.text.contains("if at least 5 people also committed"));
        assert!(rendered.text.contains("Friday, May 3rd @ 10:30PM"));
        assert!(rendered.text.contains("https://example.org/action/climate-strike"));
        assert!(rendered.html.is_none());
    }

    #[test]
    fn test_rsvp_uses_first_name() {
        let event = event();
        let ctx = RenderContext::for_event(&event, "https://example.org/a").recipient(&attendance(0));
        let rendered = renderer().render(Template::RsvpConfirmation, &ctx).unwrap();
        assert_eq!(rendered.subject, "[XR] RSVP confirmation for Climate Strike");
        assert!(rendered.text.contains("Hi Ada,"));
    }

    #[test]
    fn test_reminders_are_multipart_and_distinct() {
        let event = event();
        let ctx = RenderContext::for_event(&event, "https://example.org/a?x=1&y=2")
            .recipient(&attendance(0));
        let next_day = renderer().render(Template::ReminderNextDay, &ctx).unwrap();
        let soon = renderer().render(Template::ReminderStartingSoon, &ctx).unwrap();

        assert_ne!(next_day.subject, soon.subject);
        assert!(next_day.subject.contains("tomorrow"));
        let html = next_day.html.unwrap();
        assert!(html.contains("x=1&amp;y=2"));
        assert!(soon.html.is_some());
    }

    #[test]
    fn test_missing_field() {
        let result = renderer().render(Template::CommitmentReached, &RenderContext::default());
        assert!(matches!(
            result,
            Err(RenderError::MissingField { field: "event", .. })
        ));
    }

    #[test]
    fn test_membership_message() {
        let ctx = RenderContext::for_circle(
            "Outreach",
            "https://example.org/circle/7/",
            "Ada Lovelace",
            "ada@example.org",
            MembershipKind::PendingMember,
        );
        let rendered = renderer().render(Template::CircleMembership, &ctx).unwrap();
        assert_eq!(rendered.subject, "[XR] pending member added to Outreach");
        assert!(rendered.text.contains("Ada Lovelace <ada@example.org> wants to join Outreach"));
        assert!(rendered.text.contains("https://example.org/circle/7/#members"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">'&'</a>"), "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;");
    }
}
