//! Classification of inbound platform events into share requests.
//!
//! Every OS-level signal (an Android intent, an iOS URL open or share
//! extension hand-off, a file discovered in the inbox) is turned into at most
//! one [`ShareRequest`]. Anything malformed or unrecognized yields `None`;
//! no partial requests are produced.

use std::path::PathBuf;

use tracing::debug;
use url::Url;

pub const ACTION_SEND: &str = "android.intent.action.SEND";
pub const ACTION_SEND_MULTIPLE: &str = "android.intent.action.SEND_MULTIPLE";
pub const ACTION_VIEW: &str = "android.intent.action.VIEW";

/// `NSUserActivityTypeBrowsingWeb`
pub const ACTIVITY_BROWSING_WEB: &str = "NSUserActivityTypeBrowsingWeb";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentAction {
    Send,
    SendMultiple,
    View,
    Other(String),
}

impl IntentAction {
    pub fn parse(action: &str) -> Self {
        match action {
            ACTION_SEND => IntentAction::Send,
            ACTION_SEND_MULTIPLE => IntentAction::SendMultiple,
            ACTION_VIEW => IntentAction::View,
            other => IntentAction::Other(other.to_string()),
        }
    }
}

/// Extras attached to an intent. `streams` holds the `EXTRA_STREAM` references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentExtras {
    pub text: Option<String>,
    pub subject: Option<String>,
    pub title: Option<String>,
    pub streams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Intent {
        action: IntentAction,
        content_type: Option<String>,
        data: Option<String>,
        extras: IntentExtras,
    },
    /// A URL opened into the app (custom scheme, universal link or file URL).
    OpenUrl(String),
    UserActivity {
        activity_type: String,
        webpage_url: Option<String>,
    },
    ShareExtension {
        text: Option<String>,
        subject: Option<String>,
        files: Vec<String>,
    },
    /// A file found in the staging inbox by the poller.
    StagedFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareRequest {
    Text {
        text: String,
        subject: Option<String>,
        title: Option<String>,
        url: Option<String>,
    },
    File {
        reference: String,
        text: Option<String>,
        subject: Option<String>,
        staged: bool,
    },
    Multiple {
        references: Vec<String>,
        text: Option<String>,
        subject: Option<String>,
    },
}

impl ShareRequest {
    /// Local file references named by this request.
    pub fn references(&self) -> &[String] {
        match self {
            ShareRequest::Text { .. } => &[],
            ShareRequest::File { reference, .. } => std::slice::from_ref(reference),
            ShareRequest::Multiple { references, .. } => references,
        }
    }
}

pub fn classify(event: &InboundEvent) -> Option<ShareRequest> {
    let request = match event {
        InboundEvent::Intent {
            action,
            content_type,
            data,
            extras,
        } => classify_intent(action, content_type.as_deref(), data.as_deref(), extras),
        InboundEvent::OpenUrl(url) => classify_url(url),
        InboundEvent::UserActivity {
            activity_type,
            webpage_url,
        } => match webpage_url {
            Some(url) if activity_type == ACTIVITY_BROWSING_WEB => classify_url(url),
            _ => None,
        },
        InboundEvent::ShareExtension {
            text,
            subject,
            files,
        } => classify_share_extension(text, subject, files),
        InboundEvent::StagedFile(path) => Some(ShareRequest::File {
            reference: path.to_string_lossy().into_owned(),
            text: None,
            subject: None,
            staged: true,
        }),
    };

    if request.is_none() {
        debug!("Inbound event did not classify as a share: {:?}", event);
    }
    request
}

fn classify_intent(
    action: &IntentAction,
    content_type: Option<&str>,
    data: Option<&str>,
    extras: &IntentExtras,
) -> Option<ShareRequest> {
    match action {
        IntentAction::Send => {
            let content_type = content_type?;
            if content_type.starts_with("text/") {
                let text = extras.text.clone()?;
                Some(ShareRequest::Text {
                    text,
                    subject: extras.subject.clone(),
                    title: extras.title.clone(),
                    url: None,
                })
            } else {
                match extras.streams.as_slice() {
                    [reference] => Some(ShareRequest::File {
                        reference: reference.clone(),
                        text: None,
                        subject: None,
                        staged: false,
                    }),
                    _ => None,
                }
            }
        }
        IntentAction::SendMultiple => {
            if extras.streams.is_empty() {
                return None;
            }
            Some(ShareRequest::Multiple {
                references: extras.streams.clone(),
                text: extras.text.clone(),
                subject: extras.subject.clone(),
            })
        }
        IntentAction::View => {
            let data = data.filter(|d| !d.is_empty())?;
            Some(ShareRequest::Text {
                text: data.to_string(),
                subject: None,
                title: None,
                url: Some(data.to_string()),
            })
        }
        IntentAction::Other(_) => None,
    }
}

fn classify_url(raw: &str) -> Option<ShareRequest> {
    if raw.is_empty() {
        return None;
    }
    let is_file = Url::parse(raw).map(|u| u.scheme() == "file").unwrap_or(false);
    if is_file {
        Some(ShareRequest::File {
            reference: raw.to_string(),
            text: None,
            subject: None,
            staged: false,
        })
    } else {
        Some(ShareRequest::Text {
            text: raw.to_string(),
            subject: None,
            title: None,
            url: Some(raw.to_string()),
        })
    }
}

fn classify_share_extension(
    text: &Option<String>,
    subject: &Option<String>,
    files: &[String],
) -> Option<ShareRequest> {
    match files {
        [] => text.clone().map(|text| ShareRequest::Text {
            text,
            subject: subject.clone(),
            title: None,
            url: None,
        }),
        [reference] => Some(ShareRequest::File {
            reference: reference.clone(),
            text: text.clone(),
            subject: subject.clone(),
            staged: false,
        }),
        _ => Some(ShareRequest::Multiple {
            references: files.to_vec(),
            text: text.clone(),
            subject: subject.clone(),
        }),
    }
}
