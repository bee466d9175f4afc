// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Minimal DASH MPD reader: only the `SegmentTemplate` of the first
//! representation matters for VOD clip downloads.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SourceError;

/// MPD file names that are swapped for segment names to build segment URIs.
const MPD_FILE_ENDINGS: [&str; 2] = ["clip.mpd", "file.mpd"];
const NUMBER_TOKEN: &str = "$Number$";
const DEFAULT_SEGMENT_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpdInfo {
    /// Initialization segment name, e.g. `seg_init.mp4`.
    pub init: String,
    /// Media segment pattern containing `$Number$`.
    pub media: String,
    pub start_number: u64,
    pub segment_secs: u64,
}

fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<SegmentTemplate\b([^>]*)/?>").expect("valid regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z][\w:-]*)\s*=\s*"([^"]*)""#).expect("valid regex"))
}

impl MpdInfo {
    pub fn parse(doc: &str) -> Result<Self, SourceError> {
        let attrs = template_re()
            .captures(doc)
            .and_then(|c| c.get(1))
            .ok_or_else(|| SourceError::Protocol("MPD has no SegmentTemplate".into()))?
            .as_str();

        let attr = |name: &str| {
            attr_re()
                .captures_iter(attrs)
                .find(|c| &c[1] == name)
                .map(|c| c[2].to_string())
        };
        let number = |name: &str| -> Result<Option<u64>, SourceError> {
            attr(name)
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|_| SourceError::Protocol(format!("MPD {name}='{v}' is not a number")))
                })
                .transpose()
        };

        let media = attr("media").ok_or_else(|| SourceError::Protocol("MPD template lacks media".into()))?;
        if !media.contains(NUMBER_TOKEN) {
            return Err(SourceError::Protocol(format!("MPD media pattern '{media}' lacks {NUMBER_TOKEN}")));
        }
        let init = attr("initialization")
            .ok_or_else(|| SourceError::Protocol("MPD template lacks initialization".into()))?;

        let timescale = number("timescale")?.filter(|t| *t > 0).unwrap_or(1);
        let segment_secs = number("duration")?
            .map(|d| (d + timescale / 2) / timescale)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_SEGMENT_SECS);

        Ok(Self {
            init,
            media,
            start_number: number("startNumber")?.unwrap_or(1),
            segment_secs,
        })
    }

    /// Name of the `index`-th (0-based) media segment.
    pub fn segment_name(&self, index: u64) -> String {
        self.media.replace(NUMBER_TOKEN, &(self.start_number + index).to_string())
    }
}

/// Replace the MPD file name in `mpd_uri` with `name`.
pub fn segment_uri(mpd_uri: &str, name: &str) -> Option<String> {
    MPD_FILE_ENDINGS
        .iter()
        .find(|ending| mpd_uri.contains(*ending))
        .map(|ending| mpd_uri.replace(ending, name))
}
