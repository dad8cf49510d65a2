//! Alert matching and at-most-once notification.
//!
//! Each satisfied alert is sent once and then deleted. The delete for a rule
//! only runs after its send succeeded, and the first failed send ends the pass,
//! so a rule is never removed without a delivered notification. A notifier
//! that does not deliver (see [`Notifier::delivers`]) leaves every rule in place.

use crate::db::{AlertCandidate, EnrollDb};
use crate::error::CycleError;
use crate::notify::{Notification, NotificationContent, Notifier, RecipientKey};
use crate::types::Term;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters of one notification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub candidates: usize,
    pub matched: usize,
    pub sent: usize,
    pub skipped_no_recipient: usize,
    /// Sent to a notifier that does not deliver; the rule was kept
    pub kept_undelivered: usize,
}

pub struct AlertNotifier {
    db: Arc<EnrollDb>,
    notifier: Arc<dyn Notifier>,
    site_url: String,
    template: Option<String>,
}

impl AlertNotifier {
    pub fn new(
        db: Arc<EnrollDb>,
        notifier: Arc<dyn Notifier>,
        site_url: impl Into<String>,
        template: Option<String>,
    ) -> Self {
        Self {
            db,
            notifier,
            site_url: site_url.into(),
            template,
        }
    }

    /// Sends and removes every alert of `term` whose section now satisfies it.
    ///
    /// # Returns
    /// * `Ok(NotifyReport)` - All matches were sent (or had no recipient)
    /// * `Err(CycleError)` - A store failure or the first failed send; alerts
    ///   not yet processed are left in place for the next cycle
    pub async fn notify_matches(&self, term: Term) -> Result<NotifyReport, CycleError> {
        let candidates = self.db.alert_candidates(term)?;
        let mut report = NotifyReport {
            candidates: candidates.len(),
            ..NotifyReport::default()
        };

        for candidate in candidates {
            if !candidate.rule.kind.is_satisfied_by(candidate.open_seats) {
                continue;
            }
            report.matched += 1;

            let Some(email) = candidate.email.as_deref().filter(|e| !e.trim().is_empty()) else {
                warn!(
                    user_id = candidate.rule.user_id,
                    course_id = %candidate.rule.course_id,
                    section_num = %candidate.rule.section_num,
                    "Matched alert has no recipient address, skipping"
                );
                report.skipped_no_recipient += 1;
                continue;
            };

            let notification = self.compose(email, &candidate);
            let recipient = RecipientKey::from_address(email);

            if let Err(e) = self.notifier.send(&notification).await {
                error!(
                    recipient = %recipient,
                    course_id = %candidate.rule.course_id,
                    section_num = %candidate.rule.section_num,
                    error = %e,
                    "Sending alert failed, stopping notification pass"
                );
                return Err(e.into());
            }
            report.sent += 1;

            if !self.notifier.delivers() {
                debug!(
                    recipient = %recipient,
                    course_id = %candidate.rule.course_id,
                    section_num = %candidate.rule.section_num,
                    "Alert not delivered, rule kept"
                );
                report.kept_undelivered += 1;
                continue;
            }

            let deleted = self.db.delete_alert(&candidate.rule)?;
            if deleted == 0 {
                // rule was changed or removed while the send was in flight
                warn!(
                    user_id = candidate.rule.user_id,
                    course_id = %candidate.rule.course_id,
                    section_num = %candidate.rule.section_num,
                    "Alert sent but no matching rule was left to delete"
                );
            }

            debug!(
                recipient = %recipient,
                course_id = %candidate.rule.course_id,
                section_num = %candidate.rule.section_num,
                alert_type = candidate.rule.kind.type_name(),
                open_seats = candidate.open_seats,
                "Alert sent and removed"
            );
        }

        info!(
            term = %term,
            candidates = report.candidates,
            matched = report.matched,
            sent = report.sent,
            kept_undelivered = report.kept_undelivered,
            "Notification pass finished"
        );
        Ok(report)
    }

    /// Builds the message for one satisfied alert.
    pub fn compose(&self, recipient: &str, candidate: &AlertCandidate) -> Notification {
        let course = &candidate.course_name;
        let section = &candidate.rule.section_num;
        let seats = candidate.open_seats;

        let content = match &self.template {
            Some(template) => NotificationContent::Templated {
                template: template.clone(),
                params: BTreeMap::from([
                    ("course_name".to_string(), course.as_str().into()),
                    ("section_num".to_string(), section.as_str().into()),
                    ("open_seats".to_string(), seats.into()),
                    ("site_url".to_string(), self.site_url.as_str().into()),
                ]),
            },
            None => {
                let site = &self.site_url;
                let site_label = site
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');

                let html_body = {
                    let course = escape_html(course);
                    let section = escape_html(section);
                    let site = escape_html(site);
                    let site_label = escape_html(site_label);
                    format!(
                        "<p><strong>Enroll Alert!</strong></p>\n\
                         <p>{course} section {section} now has {seats} open seat(s).</p>\n\
                         <p>You will no longer receive alerts for {course} section {section}. \
                         If you would like to set up a new alert, please visit \
                         <a href=\"{site}\">{site_label}</a>.</p>\n\
                         <p>Happy enrolling!</p>"
                    )
                };
                let text_body = format!(
                    "Enroll Alert!\n\n\
                     {course} section {section} now has {seats} open seat(s).\n\n\
                     You will no longer receive alerts for {course} section {section}.\n\
                     To create a new alert, visit {site}.\n\n\
                     Happy enrolling!"
                );

                NotificationContent::Simple {
                    subject: "Course Alert".to_string(),
                    html_body,
                    text_body,
                }
            }
        };

        Notification {
            recipient: recipient.to_string(),
            content,
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
