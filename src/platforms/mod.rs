use std::fmt;

pub mod generic_ytdlp;
pub mod traits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    Other,
}

impl Platform {
    pub fn from_url(url: &str) -> Self {
        let host = match url::Url::parse(url) {
            Ok(parsed) => parsed.host_str().map(|h| h.to_lowercase()).unwrap_or_default(),
            Err(_) => return Platform::Other,
        };
        if host == "youtube.com"
            || host.ends_with(".youtube.com")
            || host == "youtu.be"
            || host.ends_with(".youtu.be")
            || host == "youtube-nocookie.com"
            || host.ends_with(".youtube-nocookie.com")
        {
            Platform::YouTube
        } else {
            Platform::Other
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::YouTube => f.write_str("youtube"),
            Platform::Other => f.write_str("generic"),
        }
    }
}
