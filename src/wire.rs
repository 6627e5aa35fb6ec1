//! Raw envelope data model for the messaging protocol wire format.
//!
//! Everything here mirrors the protocol's deeply nested, partially-optional
//! shapes one-to-one (camelCase wire names, every field optional). The
//! normalizer consumes these via [`unwrap_content`], a total match over the
//! wrapper variants, so that no business logic ever probes raw optionals.

use serde::{Deserialize, Serialize};

/// Addressing key of a message: which chat, which message id, whose device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// One message envelope as delivered by the socket layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebMessageInfo {
    pub key: MessageKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    /// Group sender, present on some envelope kinds outside the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// The nested message content union. Exactly one branch is expected to be
/// populated on the wire, but nothing enforces it, so every consumer goes
/// through [`MessageContent::kind`] / [`unwrap_content`] instead of reading
/// branches directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_message: Option<ContactMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_creation_message: Option<PollCreationMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_message: Option<ReactionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buttons_response_message: Option<ButtonsResponseMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_response_message: Option<ListResponseMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_button_reply_message: Option<TemplateButtonReplyMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive_response_message: Option<InteractiveResponseMessage>,

    // Wrapper shapes around an inner message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_message: Option<Box<WrappedMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2: Option<Box<WrappedMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_once_message_v2_extension: Option<Box<WrappedMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Box<WrappedMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_message: Option<Box<ProtocolMessage>>,
    /// Generically nested `message` field used by some envelope kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Box<MessageContent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WrappedMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Box<MessageContent>>,
}

/// Protocol (system) marker. Type 14 is an edit marker carrying the
/// replacement content; everything else is an ack/system envelope with no
/// user-visible content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolMessage {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<MessageKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Box<MessageContent>>,
}

pub const PROTOCOL_MESSAGE_EDIT: i32 = 14;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedTextMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_thumbnail: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_direct_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollCreationMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<MessageKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonsResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_button_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_display_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_select_reply: Option<SingleSelectReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SingleSelectReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_row_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateButtonReplyMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_display_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractiveResponseMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

/// Reply/mention context attached to a content branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stanza_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentioned_jid: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_mentions: Vec<GroupMention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<Box<MessageContent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMention {
    pub group_jid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_subject: Option<String>,
}

/// The wrapper shapes [`unwrap_content`] can peel, in priority order.
enum WireShape<'a> {
    ViewOnceExtension(&'a MessageContent),
    ViewOnce(&'a MessageContent),
    /// Edit marker: the embedded replacement is the visible content.
    ProtocolReplacement(&'a MessageContent),
    Nested(&'a MessageContent),
    Plain,
}

fn shape(content: &MessageContent) -> WireShape<'_> {
    if let Some(inner) = content
        .view_once_message_v2_extension
        .as_ref()
        .and_then(|w| w.message.as_deref())
    {
        return WireShape::ViewOnceExtension(inner);
    }
    if let Some(inner) = content
        .view_once_message_v2
        .as_ref()
        .and_then(|w| w.message.as_deref())
    {
        return WireShape::ViewOnce(inner);
    }
    if let Some(proto) = content.protocol_message.as_deref() {
        if proto.kind == Some(PROTOCOL_MESSAGE_EDIT) {
            if let Some(replacement) = proto.edited_message.as_deref() {
                return WireShape::ProtocolReplacement(replacement);
            }
        }
    }
    if let Some(inner) = content.message.as_deref() {
        return WireShape::Nested(inner);
    }
    WireShape::Plain
}

/// Unwrap one layer of wire packaging: ephemeral wrappers first, then the
/// first matching wrapper shape. The default arm leaves the content
/// unchanged, so unwrapping is total and never fails on unexpected shapes.
pub fn unwrap_content(mut content: MessageContent) -> MessageContent {
    if let Some(inner) = content
        .ephemeral_message
        .as_ref()
        .and_then(|w| w.message.as_deref())
    {
        content = inner.clone();
    }
    match shape(&content) {
        WireShape::ViewOnceExtension(inner) => inner.clone(),
        WireShape::ViewOnce(inner) => inner.clone(),
        WireShape::ProtocolReplacement(inner) => inner.clone(),
        WireShape::Nested(inner) => inner.clone(),
        WireShape::Plain => content,
    }
}

impl MessageContent {
    /// Wire name of the winning content branch, probed in a fixed order.
    pub fn kind(&self) -> &'static str {
        if self.conversation.is_some() {
            "conversation"
        } else if self.extended_text_message.is_some() {
            "extendedTextMessage"
        } else if self.image_message.is_some() {
            "imageMessage"
        } else if self.video_message.is_some() {
            "videoMessage"
        } else if self.audio_message.is_some() {
            "audioMessage"
        } else if self.sticker_message.is_some() {
            "stickerMessage"
        } else if self.document_message.is_some() {
            "documentMessage"
        } else if self.contact_message.is_some() {
            "contactMessage"
        } else if self.poll_creation_message.is_some() {
            "pollCreationMessage"
        } else if self.reaction_message.is_some() {
            "reactionMessage"
        } else if self.buttons_response_message.is_some() {
            "buttonsResponseMessage"
        } else if self.list_response_message.is_some() {
            "listResponseMessage"
        } else if self.template_button_reply_message.is_some() {
            "templateButtonReplyMessage"
        } else if self.interactive_response_message.is_some() {
            "interactiveResponseMessage"
        } else if self.edited_message.is_some() {
            "editedMessage"
        } else if self.protocol_message.is_some() {
            "protocolMessage"
        } else {
            "unknown"
        }
    }

    /// Context info of the winning content branch, if that branch carries one.
    pub fn context_info(&self) -> Option<&ContextInfo> {
        if let Some(m) = &self.extended_text_message {
            return m.context_info.as_ref();
        }
        for media in [
            &self.image_message,
            &self.video_message,
            &self.audio_message,
            &self.sticker_message,
            &self.document_message,
        ]
        .into_iter()
        .flatten()
        {
            if media.context_info.is_some() {
                return media.context_info.as_ref();
            }
        }
        if let Some(m) = &self.contact_message {
            return m.context_info.as_ref();
        }
        if let Some(m) = &self.poll_creation_message {
            return m.context_info.as_ref();
        }
        if let Some(m) = &self.buttons_response_message {
            return m.context_info.as_ref();
        }
        if let Some(m) = &self.list_response_message {
            return m.context_info.as_ref();
        }
        if let Some(m) = &self.template_button_reply_message {
            return m.context_info.as_ref();
        }
        if let Some(m) = &self.interactive_response_message {
            return m.context_info.as_ref();
        }
        None
    }

    /// Extracted text body: first non-empty match over the fixed priority
    /// list (plain text, caption, interactive-reply ids, titles, names).
    /// Falls back to the empty string, never errors.
    pub fn body(&self) -> String {
        let non_empty = |s: &&String| !s.is_empty();
        self.extended_text_message
            .as_ref()
            .and_then(|m| m.text.as_ref())
            .filter(non_empty)
            .or(self.conversation.as_ref().filter(non_empty))
            .or(self.caption())
            .or(self
                .buttons_response_message
                .as_ref()
                .and_then(|m| m.selected_button_id.as_ref())
                .filter(non_empty))
            .or(self
                .list_response_message
                .as_ref()
                .and_then(|m| m.single_select_reply.as_ref())
                .and_then(|r| r.selected_row_id.as_ref())
                .filter(non_empty))
            .or(self
                .template_button_reply_message
                .as_ref()
                .and_then(|m| m.selected_id.as_ref())
                .filter(non_empty))
            .or(self
                .interactive_response_message
                .as_ref()
                .and_then(|m| m.content_text.as_ref())
                .filter(non_empty))
            .or(self.selected_display_text())
            .or(self.title())
            .or(self
                .contact_message
                .as_ref()
                .and_then(|m| m.display_name.as_ref())
                .filter(non_empty))
            .or(self
                .poll_creation_message
                .as_ref()
                .and_then(|m| m.name.as_ref())
                .filter(non_empty))
            .cloned()
            .unwrap_or_default()
    }

    fn caption(&self) -> Option<&String> {
        [
            &self.image_message,
            &self.video_message,
            &self.document_message,
        ]
        .into_iter()
        .flatten()
        .find_map(|m| m.caption.as_ref().filter(|c| !c.is_empty()))
    }

    fn selected_display_text(&self) -> Option<&String> {
        self.buttons_response_message
            .as_ref()
            .and_then(|m| m.selected_display_text.as_ref())
            .or(self
                .template_button_reply_message
                .as_ref()
                .and_then(|m| m.selected_display_text.as_ref()))
            .filter(|s| !s.is_empty())
    }

    fn title(&self) -> Option<&String> {
        self.list_response_message
            .as_ref()
            .and_then(|m| m.title.as_ref())
            .or(self
                .document_message
                .as_ref()
                .and_then(|m| m.title.as_ref()))
            .filter(|s| !s.is_empty())
    }

    /// Whether the winning branch carries media (mimetype or thumbnail).
    pub fn is_media(&self) -> bool {
        [
            &self.image_message,
            &self.video_message,
            &self.audio_message,
            &self.sticker_message,
            &self.document_message,
        ]
        .into_iter()
        .flatten()
        .any(|m| {
            m.mimetype.is_some()
                || m.thumbnail_direct_path.is_some()
                || m.jpeg_thumbnail.is_some()
        })
    }

    /// Mentioned user jids plus mentioned-group jids from the context info.
    pub fn mentions(&self) -> Vec<String> {
        let Some(ctx) = self.context_info() else {
            return Vec::new();
        };
        ctx.mentioned_jid
            .iter()
            .cloned()
            .chain(ctx.group_mentions.iter().map(|g| g.group_jid.clone()))
            .collect()
    }
}
