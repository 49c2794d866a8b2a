use std::io::BufRead;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::XlsxError;

/// Plain text of every `<si>` item in `xl/sharedStrings.xml`, in index order.
pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                items.push(read_string_item(&mut reader)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => items.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

/// Read the body of a string item (`<si>` or a cell's `<is>`) up to its end tag.
///
/// Text is the concatenation of `<t>` elements, whether direct children or inside rich-text
/// runs. Phonetic runs (`<rPh>`) are not part of the displayed text and are skipped.
pub(crate) fn read_string_item<R: BufRead>(reader: &mut Reader<R>) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut depth = 0usize;
    let mut in_t = false;
    let mut phonetic_depth: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                if phonetic_depth.is_none() {
                    match e.local_name().as_ref() {
                        b"rPh" => phonetic_depth = Some(depth),
                        b"t" => in_t = true,
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                if depth == 0 {
                    break;
                }
                if phonetic_depth == Some(depth) {
                    phonetic_depth = None;
                } else if e.local_name().as_ref() == b"t" {
                    in_t = false;
                }
                depth -= 1;
            }
            Event::Text(text) if in_t && phonetic_depth.is_none() => {
                out.push_str(&text.unescape()?);
            }
            Event::CData(text) if in_t && phonetic_depth.is_none() => {
                out.push_str(&String::from_utf8_lossy(&text));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
