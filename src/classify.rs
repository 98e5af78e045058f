use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::platform::{Document, DocumentAttribute, NativeMedia};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Sticker,
    Video,
    Audio,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Image => write!(f, "image"),
            MessageKind::File => write!(f, "file"),
            MessageKind::Sticker => write!(f, "sticker"),
            MessageKind::Video => write!(f, "video"),
            MessageKind::Audio => write!(f, "audio"),
        }
    }
}

/// Outcome of inspecting a message's media payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: MessageKind,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    /// File suffix including the leading dot, e.g. `".jpg"`.
    pub suffix: Option<String>,
    /// Set when the payload was not recognized and degraded to `File`.
    pub fallback: bool,
}

impl Classification {
    fn text() -> Self {
        Self::bare(MessageKind::Text)
    }

    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            filename: None,
            mime_type: None,
            suffix: None,
            fallback: false,
        }
    }

    pub fn has_media(&self) -> bool {
        self.kind != MessageKind::Text
    }
}

/// Derive the message kind and file metadata from a media payload.
///
/// Photos are the only payload classified as `Image`; image documents stay
/// `File`. When a document carries several kind markers the precedence is
/// Sticker > Video > Audio, independent of attribute order.
pub fn classify(media: Option<&NativeMedia>) -> Classification {
    match media {
        None => Classification::text(),
        Some(NativeMedia::Photo) => Classification {
            mime_type: Some("image/jpeg".to_string()),
            suffix: Some(".jpg".to_string()),
            ..Classification::bare(MessageKind::Image)
        },
        Some(NativeMedia::Document(doc)) => classify_document(doc),
        Some(NativeMedia::Unsupported(_)) => Classification {
            fallback: true,
            ..Classification::bare(MessageKind::File)
        },
    }
}

fn classify_document(doc: &Document) -> Classification {
    let mut out = Classification {
        mime_type: doc.mime_type.clone(),
        suffix: doc.mime_type.as_deref().and_then(extension_for_mime),
        ..Classification::bare(MessageKind::File)
    };

    let (mut sticker, mut video, mut audio) = (false, false, false);
    for attr in &doc.attributes {
        match attr {
            DocumentAttribute::Filename(name) => {
                if let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) {
                    out.suffix = Some(format!(".{}", ext));
                }
                out.filename = Some(name.clone());
            }
            DocumentAttribute::Sticker => sticker = true,
            DocumentAttribute::Video => video = true,
            DocumentAttribute::Audio => audio = true,
            DocumentAttribute::Other => {}
        }
    }

    out.kind = if sticker {
        MessageKind::Sticker
    } else if video {
        MessageKind::Video
    } else if audio {
        MessageKind::Audio
    } else {
        MessageKind::File
    };
    out
}

/// Preferred file suffix for a MIME type, with the leading dot.
pub fn extension_for_mime(mime: &str) -> Option<String> {
    let ext = match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" => "m4a",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "text/plain" => "txt",
        "application/x-tgsticker" => "tgs",
        other => {
            return mime_guess::get_mime_extensions_str(other)
                .and_then(|exts| exts.first())
                .map(|ext| format!(".{}", ext));
        }
    };
    Some(format!(".{}", ext))
}

/// Kind of an outbound attachment, judged from its path.
pub fn kind_for_path(path: &Path) -> MessageKind {
    match mime_guess::from_path(path).first() {
        Some(mime) if mime.type_() == mime_guess::mime::IMAGE => MessageKind::Image,
        Some(mime) if mime.type_() == mime_guess::mime::VIDEO => MessageKind::Video,
        Some(mime) if mime.type_() == mime_guess::mime::AUDIO => MessageKind::Audio,
        _ => MessageKind::File,
    }
}
