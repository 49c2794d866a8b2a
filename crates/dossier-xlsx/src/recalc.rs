//! Calculation metadata updates for workbooks whose formulas were overwritten.
//!
//! Once a formula cell becomes a literal, `xl/calcChain.xml` may point at a cell that no longer
//! computes anything, which Excel reports as corruption. The chain is dropped together with its
//! relationship and content-type override, and a full calculation is requested on load.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::openxml::{element_prefix, local_name, prefixed_tag};
use crate::scan::attr_value;
use crate::XlsxError;

/// Set `fullCalcOnLoad="1"` on `<calcPr>`, adding the element when the workbook has none.
pub(crate) fn force_full_calc_on_load(workbook_xml: &[u8]) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len() + 64));

    let mut buf = Vec::new();
    let mut saw_calc_pr = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                writer.write_event(Event::Empty(calc_pr_with_full_calc(e)?))?;
            }
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                writer.write_event(Event::Start(calc_pr_with_full_calc(e)?))?;
            }
            Event::End(ref e) if local_name(e.name().as_ref()) == b"workbook" => {
                if !saw_calc_pr {
                    let name = e.name();
                    let prefix = element_prefix(name.as_ref()).map(String::from_utf8_lossy);
                    let mut calc_pr = BytesStart::new(prefixed_tag(prefix.as_deref(), "calcPr"));
                    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
                    writer.write_event(Event::Empty(calc_pr))?;
                }
                writer.write_event(Event::End(e.to_owned()))?;
            }
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn calc_pr_with_full_calc(e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
    let mut calc_pr = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"fullCalcOnLoad" {
            calc_pr.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
        }
    }
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    Ok(calc_pr)
}

/// Drop the calc chain `<Relationship>` from the workbook relationships part.
pub(crate) fn remove_calc_chain_relationship(rels_xml: &[u8]) -> Result<Vec<u8>, XlsxError> {
    remove_elements(rels_xml, b"Relationship", |e| {
        let rel_type = attr_value(e, b"Type")?.unwrap_or_default();
        let target = attr_value(e, b"Target")?.unwrap_or_default();
        Ok(rel_type.ends_with(crate::openxml::REL_TYPE_CALC_CHAIN)
            || target.ends_with("calcChain.xml"))
    })
}

/// Drop the calc chain `<Override>` from `[Content_Types].xml`.
pub(crate) fn remove_calc_chain_override(content_types_xml: &[u8]) -> Result<Vec<u8>, XlsxError> {
    remove_elements(content_types_xml, b"Override", |e| {
        Ok(attr_value(e, b"PartName")?.is_some_and(|name| name.ends_with("calcChain.xml")))
    })
}

fn remove_elements(
    xml: &[u8],
    element: &[u8],
    is_target: impl Fn(&BytesStart<'_>) -> Result<bool, XlsxError>,
) -> Result<Vec<u8>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    let mut buf = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(_) if skip_depth > 0 => skip_depth -= 1,
            _ if skip_depth > 0 => {}
            Event::Start(ref e) if local_name(e.name().as_ref()) == element && is_target(e)? => {
                skip_depth = 1;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == element && is_target(e)? => {}
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}
