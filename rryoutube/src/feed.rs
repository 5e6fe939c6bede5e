//! Channel Atom feed (`/feeds/videos.xml?channel_id=...`).

use std::{
    io::{BufRead, BufReader},
    time::Duration,
};

use chrono::{DateTime, FixedOffset};
use quick_xml::{Error as XmlError, Reader, escape::resolve_predefined_entity, events::Event};
use tracing::debug;
use ureq::Agent;

use crate::{
    error::{Result, YoutubeError},
    video_url,
};

const FEED_BASE_URL: &str = "https://www.youtube.com/feeds/videos.xml";

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEntry {
    pub video_id: String,
    pub title: String,
    pub published: Option<DateTime<FixedOffset>>,
    pub url: String,
}

/// Anything able to list the latest videos of a channel.
pub trait FeedSource: Send + Sync {
    fn fetch_channel(&self, channel_id: &str, limit: usize) -> Result<Vec<VideoEntry>>;
}

pub struct ChannelFeedClient {
    agent: Agent,
    base_url: String,
}

impl ChannelFeedClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(FEED_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.into(),
        }
    }
}

impl FeedSource for ChannelFeedClient {
    fn fetch_channel(&self, channel_id: &str, limit: usize) -> Result<Vec<VideoEntry>> {
        let url = format!("{}?channel_id={}", self.base_url, channel_id);
        debug!(channel = channel_id, url = %url, "Fetching channel feed");

        let response = self.agent.get(&url).call()?;
        let (_parts, body) = response.into_parts();
        let videos = parse_feed(BufReader::new(body.into_reader()), limit)?;

        debug!(channel = channel_id, count = videos.len(), "Channel feed parsed");
        if videos.is_empty() {
            return Err(YoutubeError::Empty(channel_id.to_string()));
        }
        Ok(videos)
    }
}

#[derive(Default)]
struct EntryBuilder {
    video_id: Option<String>,
    title: Option<String>,
    published: Option<String>,
    link: Option<String>,
}

impl EntryBuilder {
    fn build(self) -> Result<VideoEntry> {
        let video_id = self
            .video_id
            .filter(|id| !id.is_empty())
            .ok_or(YoutubeError::MissingField("yt:videoId"))?;
        let published = self
            .published
            .as_deref()
            .and_then(|p| DateTime::parse_from_rfc3339(p).ok());
        let url = self.link.unwrap_or_else(|| video_url(&video_id));
        Ok(VideoEntry {
            title: self.title.unwrap_or_else(|| video_id.clone()),
            video_id,
            published,
            url,
        })
    }
}

/// Streams an Atom feed and keeps the first `limit` entries (the feed lists
/// newest first).
pub fn parse_feed<R: BufRead>(input: R, limit: usize) -> Result<Vec<VideoEntry>> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut videos = Vec::new();

    let mut entry: Option<EntryBuilder> = None;
    let mut current_tag: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "entry" => entry = Some(EntryBuilder::default()),
                    "link" => {
                        if let Some(builder) = entry.as_mut() {
                            read_link(&e, builder)?;
                        }
                    }
                    _ => {
                        if entry.is_some() {
                            current_tag = Some(name);
                            text.clear();
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if e.name().as_ref() == b"link" {
                    if let Some(builder) = entry.as_mut() {
                        read_link(&e, builder)?;
                    }
                }
            }
            Event::Text(e) => {
                if current_tag.is_some() {
                    text.push_str(&e.decode().map_err(XmlError::Encoding)?);
                }
            }
            Event::GeneralRef(e) => {
                if current_tag.is_some() {
                    if let Some(ch) = e.resolve_char_ref()? {
                        text.push(ch);
                    } else {
                        let name = e.decode().map_err(XmlError::Encoding)?;
                        if let Some(value) = resolve_predefined_entity(&name) {
                            text.push_str(value);
                        }
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                if name.as_ref() == b"entry" {
                    if let Some(builder) = entry.take() {
                        videos.push(builder.build()?);
                        if videos.len() >= limit {
                            break;
                        }
                    }
                } else if let (Some(tag), Some(builder)) = (current_tag.take(), entry.as_mut()) {
                    let value = text.trim().to_string();
                    match tag.as_str() {
                        "yt:videoId" => builder.video_id = Some(value),
                        // media:title duplicates the entry title
                        "title" => builder.title = Some(value),
                        "published" => builder.published = Some(value),
                        _ => {}
                    }
                    text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(videos)
}

fn read_link(e: &quick_xml::events::BytesStart<'_>, builder: &mut EntryBuilder) -> Result<()> {
    let mut rel = None;
    let mut href = None;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"rel" => rel = Some(String::from_utf8_lossy(&attr.value).to_string()),
            b"href" => href = Some(String::from_utf8_lossy(&attr.value).to_string()),
            _ => {}
        }
    }
    if rel.as_deref().unwrap_or("alternate") == "alternate" && builder.link.is_none() {
        builder.link = href;
    }
    Ok(())
}
