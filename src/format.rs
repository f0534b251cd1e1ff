//! File-format tags and the strategy each one is preprocessed with.
//!
//! The tag set is closed: every [`FormatTag`] maps to exactly one
//! [`Strategy`] through an exhaustive `match`, so adding a tag without a
//! strategy is a compile error rather than a runtime fallthrough.

use crate::error::ExplainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A declared file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Png,
    Jpeg,
    Jpg,
    Drawio,
    Bpmn,
    Svg,
    Txt,
    Pdf,
}

/// The vector/diagram formats that need an external converter process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagramKind {
    Bpmn,
    Drawio,
    Svg,
}

/// Raster formats embedded as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }
}

/// How a request's payload is turned into content parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Embed the raster payload directly as one image part.
    Image(ImageKind),
    /// Rasterise through an external converter, then embed.
    Diagram(DiagramKind),
    /// Decode the payload and append it to the user text.
    Text,
    /// Rasterise every page of a paginated document.
    Document,
}

impl FormatTag {
    /// Every supported tag, in declaration order.
    pub const ALL: [FormatTag; 8] = [
        FormatTag::Png,
        FormatTag::Jpeg,
        FormatTag::Jpg,
        FormatTag::Drawio,
        FormatTag::Bpmn,
        FormatTag::Svg,
        FormatTag::Txt,
        FormatTag::Pdf,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FormatTag::Png => "png",
            FormatTag::Jpeg => "jpeg",
            FormatTag::Jpg => "jpg",
            FormatTag::Drawio => "drawio",
            FormatTag::Bpmn => "bpmn",
            FormatTag::Svg => "svg",
            FormatTag::Txt => "txt",
            FormatTag::Pdf => "pdf",
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            FormatTag::Png => Strategy::Image(ImageKind::Png),
            FormatTag::Jpeg | FormatTag::Jpg => Strategy::Image(ImageKind::Jpeg),
            FormatTag::Drawio => Strategy::Diagram(DiagramKind::Drawio),
            FormatTag::Bpmn => Strategy::Diagram(DiagramKind::Bpmn),
            FormatTag::Svg => Strategy::Diagram(DiagramKind::Svg),
            FormatTag::Txt => Strategy::Text,
            FormatTag::Pdf => Strategy::Document,
        }
    }
}

impl DiagramKind {
    pub fn tag(self) -> FormatTag {
        match self {
            DiagramKind::Bpmn => FormatTag::Bpmn,
            DiagramKind::Drawio => FormatTag::Drawio,
            DiagramKind::Svg => FormatTag::Svg,
        }
    }

    /// File extension the converter writes.
    pub fn output_extension(self) -> &'static str {
        match self {
            DiagramKind::Drawio => "jpg",
            DiagramKind::Bpmn | DiagramKind::Svg => "png",
        }
    }

    /// MIME type of the converter's output.
    pub fn output_mime(self) -> &'static str {
        match self {
            DiagramKind::Drawio => "image/jpeg",
            DiagramKind::Bpmn | DiagramKind::Svg => "image/png",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = ExplainError;

    /// Accepts an optional leading `.` and ignores ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().trim_start_matches('.').to_ascii_lowercase();
        FormatTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == normalised)
            .ok_or_else(|| ExplainError::UnsupportedFormat {
                format: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_round_trips_through_its_name() {
        for tag in FormatTag::ALL {
            assert_eq!(tag.as_str().parse::<FormatTag>().unwrap(), tag);
        }
    }

    #[test]
    fn every_tag_has_exactly_one_strategy() {
        let strategies: Vec<Strategy> = FormatTag::ALL.iter().map(|t| t.strategy()).collect();
        assert_eq!(strategies.len(), FormatTag::ALL.len());
        assert_eq!(FormatTag::Png.strategy(), Strategy::Image(ImageKind::Png));
        assert_eq!(FormatTag::Jpg.strategy(), Strategy::Image(ImageKind::Jpeg));
        assert_eq!(
            FormatTag::Bpmn.strategy(),
            Strategy::Diagram(DiagramKind::Bpmn)
        );
        assert_eq!(FormatTag::Txt.strategy(), Strategy::Text);
        assert_eq!(FormatTag::Pdf.strategy(), Strategy::Document);
    }

    #[test]
    fn image_tags_carry_their_mime_type() {
        let mime = |tag: FormatTag| match tag.strategy() {
            Strategy::Image(kind) => Some(kind.mime()),
            _ => None,
        };
        assert_eq!(mime(FormatTag::Png), Some("image/png"));
        assert_eq!(mime(FormatTag::Jpeg), Some("image/jpeg"));
        assert_eq!(mime(FormatTag::Jpg), Some("image/jpeg"));
        assert_eq!(mime(FormatTag::Svg), None);
    }

    #[test]
    fn diagram_kinds_map_back_to_their_tag() {
        for tag in FormatTag::ALL {
            if let Strategy::Diagram(kind) = tag.strategy() {
                assert_eq!(kind.tag(), tag);
            }
        }
    }

    #[test]
    fn parse_is_lenient_about_dot_and_case() {
        assert_eq!(".PNG".parse::<FormatTag>().unwrap(), FormatTag::Png);
        assert_eq!(" DrawIO ".parse::<FormatTag>().unwrap(), FormatTag::Drawio);
    }

    #[test]
    fn parse_rejects_unknown_tags() {
        let err = "docx".parse::<FormatTag>().unwrap_err();
        assert_eq!(
            err,
            ExplainError::UnsupportedFormat {
                format: "docx".into()
            }
        );
        assert!("".parse::<FormatTag>().is_err());
    }
}
