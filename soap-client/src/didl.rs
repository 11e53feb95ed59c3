//! DIDL-Lite item metadata.
//!
//! Renderers expect `CurrentURIMetaData` to carry a DIDL-Lite document as
//! escaped text, and report the same shape back (escaped again inside the
//! response envelope) as `TrackMetaData`.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::SoapError;

/// UPnP class of a single playable item, picked from the MIME top-level type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemClass {
    Image,
    Video,
    Audio,
}

impl ItemClass {
    /// `None` for top-level types other than image, video and audio.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        match mime_type.split('/').next()? {
            "image" => Some(ItemClass::Image),
            "video" => Some(ItemClass::Video),
            "audio" => Some(ItemClass::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemClass::Image => "object.item.imageItem",
            ItemClass::Video => "object.item.videoItem",
            ItemClass::Audio => "object.item.audioItem",
        }
    }
}

/// Build an escaped DIDL-Lite fragment describing one item, ready to be
/// used as the `CurrentURIMetaData` argument.
///
/// Items whose MIME type is not image, video or audio are described
/// without a `upnp:class` element.
pub fn build_didl_lite_metadata(
    media_url: &str,
    mime_type: &str,
    title: Option<&str>,
    description: Option<&str>,
    icon_url: Option<&str>,
) -> String {
    let mut item = String::new();
    if let Some(title) = title {
        item.push_str(&format!("<dc:title>{}</dc:title>", escape(title)));
    }
    if let Some(description) = description {
        item.push_str(&format!(
            "<dc:description>{}</dc:description>",
            escape(description)
        ));
    }
    item.push_str(&format!(
        r#"<res protocolInfo="http-get:*:{}:DLNA.ORG_OP=01">{}</res>"#,
        escape(mime_type),
        escape(media_url)
    ));
    if let Some(icon_url) = icon_url {
        item.push_str(&format!(
            "<upnp:albumArtURI>{}</upnp:albumArtURI>",
            escape(icon_url)
        ));
    }
    if let Some(class) = ItemClass::from_mime(mime_type) {
        item.push_str(&format!("<upnp:class>{}</upnp:class>", class.as_str()));
    }

    let didl = format!(
        concat!(
            r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#,
            r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/">"#,
            r#"<item id="1000" parentID="0" restricted="0">{}</item></DIDL-Lite>"#
        ),
        item
    );
    escape(&didl).into_owned()
}

/// The fields of a DIDL-Lite item this crate cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DidlItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub protocol_info: Option<String>,
    pub icon_url: Option<String>,
    pub class: Option<String>,
}

impl DidlItem {
    /// MIME type from the third field of `protocolInfo`.
    pub fn mime_type(&self) -> Option<&str> {
        self.protocol_info
            .as_deref()
            .and_then(|info| info.split(':').nth(2))
            .filter(|mime| !mime.is_empty() && *mime != "*")
    }
}

#[derive(Clone, Copy)]
enum ItemField {
    Title,
    Description,
    Res,
    AlbumArt,
    Class,
}

/// Parse the first item of an (already unescaped) DIDL-Lite document.
pub fn parse_didl_item(didl: &str) -> Result<DidlItem, SoapError> {
    let mut reader = Reader::from_str(didl);
    reader.trim_text(true);

    let mut item = DidlItem::default();
    let mut in_item = false;
    let mut seen_item = false;
    let mut current: Option<ItemField> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => match start.local_name().as_ref() {
                b"item" if !seen_item => {
                    in_item = true;
                    seen_item = true;
                }
                b"title" if in_item => current = Some(ItemField::Title),
                b"description" if in_item => current = Some(ItemField::Description),
                b"albumArtURI" if in_item => current = Some(ItemField::AlbumArt),
                b"class" if in_item => current = Some(ItemField::Class),
                b"res" if in_item && item.url.is_none() => {
                    item.protocol_info = attribute(&start, b"protocolInfo")?;
                    current = Some(ItemField::Res);
                }
                _ => current = None,
            },
            Ok(Event::Text(text)) => {
                if let Some(field) = current {
                    let value = text
                        .unescape()
                        .map_err(|e| SoapError::Parse(e.to_string()))?
                        .into_owned();
                    let slot = match field {
                        ItemField::Title => &mut item.title,
                        ItemField::Description => &mut item.description,
                        ItemField::Res => &mut item.url,
                        ItemField::AlbumArt => &mut item.icon_url,
                        ItemField::Class => &mut item.class,
                    };
                    slot.get_or_insert(value);
                }
            }
            Ok(Event::End(end)) => {
                if end.local_name().as_ref() == b"item" {
                    in_item = false;
                }
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SoapError::Parse(format!("Invalid DIDL-Lite: {e}"))),
            _ => {}
        }
    }

    if seen_item {
        Ok(item)
    } else {
        Err(SoapError::Parse("DIDL-Lite document has no item".to_string()))
    }
}

fn attribute(start: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, SoapError> {
    let attr = start
        .try_get_attribute(name)
        .map_err(|e| SoapError::Parse(e.to_string()))?;
    attr.map(|a| {
        a.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|e| SoapError::Parse(e.to_string()))
    })
    .transpose()
}
