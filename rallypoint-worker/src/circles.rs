/// Circle notifications
///
/// Circles are working groups. They receive two kinds of mail: notices when
/// someone joins or asks to join, and website contact messages, which go to
/// the outreach circle. Both go to the circle's public address plus its
/// leads, as a single message.

use crate::config::NotifierConfig;
use crate::dispatch::Dispatcher;
use crate::error::NotifyResult;
use crate::render::{MessageRenderer, RenderContext, Template};
use rallypoint_shared::models::{Circle, Contact};
use rallypoint_shared::store::AttendanceStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipKind {
    /// Asked to join; waiting for approval
    PendingMember,
    Member,
}

impl MembershipKind {
    /// Label used in subjects
    pub fn label(&self) -> &'static str {
        match self {
            MembershipKind::PendingMember => "pending member",
            MembershipKind::Member => "member",
        }
    }

    /// Verb phrase used in bodies
    pub fn action(&self) -> &'static str {
        match self {
            MembershipKind::PendingMember => "wants to join",
            MembershipKind::Member => "joined",
        }
    }
}

/// Circle notifier
pub struct CircleNotifier {
    store: Arc<dyn AttendanceStore>,
    dispatcher: Arc<dyn Dispatcher>,
    renderer: Arc<dyn MessageRenderer>,
    from_email: String,
    base_url: String,
    outreach_circle: String,
}

impl CircleNotifier {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        dispatcher: Arc<dyn Dispatcher>,
        renderer: Arc<dyn MessageRenderer>,
        config: &NotifierConfig,
    ) -> Self {
        CircleNotifier {
            store,
            dispatcher,
            renderer,
            from_email: config.from_email.clone(),
            base_url: config.base_url.clone(),
            outreach_circle: config.outreach_circle.clone(),
        }
    }

    pub fn circle_url(&self, circle: &Circle) -> String {
        format!("{}/circle/{}/", self.base_url.trim_end_matches('/'), circle.id)
    }

    /// Tells a circle that `member` joined or asked to join
    ///
    /// Returns the number of messages sent: 0 when the circle has no
    /// notification address.
    pub async fn notify_membership(
        &self,
        circle: &Circle,
        kind: MembershipKind,
        member: &Contact,
    ) -> NotifyResult<usize> {
        let addresses = circle.notification_addresses();
        if addresses.is_empty() {
            tracing::warn!(circle = %circle.name, "Circle has no notification addresses");
            return Ok(0);
        }

        let context = RenderContext::for_circle(
            &circle.name,
            &self.circle_url(circle),
            &member.full_name(),
            &member.email,
            kind,
        );
        let message = self
            .renderer
            .render(Template::CircleMembership, &context)?
            .into_message(&self.from_email, addresses);

        let sent = self.dispatcher.send_batch(vec![message]).await?;
        tracing::info!(circle = %circle.name, kind = kind.label(), "Membership notice sent");
        Ok(sent)
    }

    /// Forwards a website contact message to the outreach circle
    ///
    /// A missing outreach circle, or one without addresses, is a
    /// configuration problem: it is logged and nothing is sent.
    pub async fn notify_outreach(&self, sender: &str, message: &str) -> NotifyResult<usize> {
        let Some(circle) = self.store.find_circle(&self.outreach_circle).await? else {
            tracing::warn!(
                prefix = %self.outreach_circle,
                "No outreach circle configured, dropping contact message"
            );
            return Ok(0);
        };

        let addresses = circle.notification_addresses();
        if addresses.is_empty() {
            tracing::warn!(circle = %circle.name, "Outreach circle has no notification addresses");
            return Ok(0);
        }

        let context = RenderContext::for_outreach(sender, message);
        let outbound = self
            .renderer
            .render(Template::OutreachContact, &context)?
            .into_message(&self.from_email, addresses);

        Ok(self.dispatcher.send_batch(vec![outbound]).await?)
    }
}
