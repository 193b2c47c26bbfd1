pub mod jacoco;

use std::io::BufRead;

use quick_xml::events::BytesStart;
use quick_xml::reader::Reader;

use crate::error::{CovboostError, Result};
use crate::model::CoverageSnapshot;

/// Every report format parser implements this trait.
pub trait ReportParser {
    /// Short format name for logs and error messages.
    fn format(&self) -> &'static str;

    /// Cheap content sniffing, used before committing to a full parse.
    fn can_parse(&self, content: &[u8]) -> bool;

    /// Parse the input bytes into a coverage snapshot.
    fn parse(&self, input: &[u8]) -> Result<CoverageSnapshot>;
}

/// First few KB of the input, lossily decoded for sniffing.
pub(crate) fn sniff_head(content: &[u8]) -> String {
    let head_len = content.len().min(4096);
    String::from_utf8_lossy(&content[..head_len]).into_owned()
}

pub(crate) fn looks_like_xml(head: &str) -> bool {
    head.contains("<?xml") || head.trim_start().starts_with('<')
}

pub(crate) fn xml_reader<R: BufRead>(reader: R) -> Reader<R> {
    let mut xml = Reader::from_reader(reader);
    xml.trim_text(true);
    xml
}

/// Wrap a low-level XML error with the reader's byte position.
pub(crate) fn xml_err<R>(err: quick_xml::Error, xml: &Reader<R>) -> CovboostError {
    CovboostError::MalformedReport(format!(
        "XML error at position {}: {}",
        xml.buffer_position(),
        err
    ))
}

/// Read an attribute value as an owned string.
pub(crate) fn get_attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Read a numeric attribute. Absent attributes default to zero; values that
/// are present but not numbers make the report malformed.
pub(crate) fn get_num_attr<T>(e: &BytesStart<'_>, name: &[u8]) -> Result<T>
where
    T: std::str::FromStr + Default,
{
    match get_attr(e, name) {
        None => Ok(T::default()),
        Some(v) => v.trim().parse::<T>().map_err(|_| {
            CovboostError::MalformedReport(format!(
                "attribute '{}' on <{}> is not a number: '{}'",
                String::from_utf8_lossy(name),
                String::from_utf8_lossy(e.name().as_ref()),
                v
            ))
        }),
    }
}
