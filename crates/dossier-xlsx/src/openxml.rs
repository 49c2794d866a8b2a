use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::XlsxError;

pub(crate) const REL_TYPE_OFFICE_DOCUMENT: &str = "/officeDocument";
pub(crate) const REL_TYPE_WORKSHEET: &str = "/worksheet";
pub(crate) const REL_TYPE_SHARED_STRINGS: &str = "/sharedStrings";
pub(crate) const REL_TYPE_CALC_CHAIN: &str = "/calcChain";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    /// Matches on the last path segment of the type URI so both the transitional and strict
    /// namespaces are accepted.
    pub(crate) fn has_type(&self, suffix: &str) -> bool {
        self.type_uri.ends_with(suffix)
    }

    pub(crate) fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

/// Every complete `<Relationship>` of a `.rels` part, in document order.
pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XlsxError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = Vec::new();

    loop {
        let rel = match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e)
                if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"Relationship") =>
            {
                relationship_from(&e)?
            }
            _ => None,
        };
        out.extend(rel);
        buf.clear();
    }

    Ok(out)
}

fn relationship_from(e: &BytesStart<'_>) -> Result<Option<Relationship>, XlsxError> {
    let mut fields: [Option<String>; 4] = Default::default();
    for attr in e.attributes() {
        let attr = attr?;
        let slot = match local_name(attr.key.as_ref()).to_ascii_lowercase().as_slice() {
            b"id" => 0,
            b"type" => 1,
            b"target" => 2,
            b"targetmode" => 3,
            _ => continue,
        };
        fields[slot] = Some(attr.unescape_value()?.into_owned());
    }

    let [id, type_uri, target, target_mode] = fields;
    match (id, type_uri, target) {
        (Some(id), Some(type_uri), Some(target)) => Ok(Some(Relationship {
            id,
            type_uri,
            target,
            target_mode,
        })),
        (id, _, _) => {
            log::warn!("skipping incomplete relationship {}", id.as_deref().unwrap_or("<no Id>"));
            Ok(None)
        }
    }
}

/// A `<sheet>` entry of `xl/workbook.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheetInfo {
    pub name: String,
    pub rel_id: String,
}

/// Sheets in tab order.
pub fn parse_workbook_sheets(workbook_xml: &[u8]) -> Result<Vec<WorkbookSheetInfo>, XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) => {
                if e.local_name().as_ref() == b"sheet" {
                    sheets.push(parse_sheet_element(&e)?);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheetInfo, XlsxError> {
    let mut name: Option<String> = None;
    let mut rel_id: Option<String> = None;

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => name = Some(attr.unescape_value()?.into_owned()),
            // `r:id`, whatever prefix the relationships namespace is bound to.
            _ if key.contains(&b':') && local_name(key) == b"id" => {
                rel_id = Some(attr.unescape_value()?.into_owned())
            }
            _ => {}
        }
    }

    Ok(WorkbookSheetInfo {
        name: name.ok_or(XlsxError::MissingAttr("name"))?,
        rel_id: rel_id.ok_or(XlsxError::MissingAttr("r:id"))?,
    })
}

pub fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

pub(crate) fn element_prefix(name: &[u8]) -> Option<&[u8]> {
    name.iter().rposition(|b| *b == b':').map(|idx| &name[..idx])
}

pub(crate) fn prefixed_tag(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relationships_with_target_mode() {
        let rels = br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/>
  <Relationship Id="broken"/>
</Relationships>"#;

        let parsed = parse_relationships(rels).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].has_type(REL_TYPE_WORKSHEET));
        assert!(!parsed[0].is_external());
        assert!(parsed[1].is_external());
    }

    #[test]
    fn parses_sheets_in_tab_order() {
        let xml = br#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
  xmlns:rel="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Infos Patient" sheetId="1" rel:id="rId1"/>
    <sheet name="Suivi &amp; notes" sheetId="7" rel:id="rId2"/>
  </sheets>
</workbook>"#;

        let sheets = parse_workbook_sheets(xml).unwrap();
        assert_eq!(
            sheets,
            vec![
                WorkbookSheetInfo {
                    name: "Infos Patient".to_string(),
                    rel_id: "rId1".to_string(),
                },
                WorkbookSheetInfo {
                    name: "Suivi & notes".to_string(),
                    rel_id: "rId2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn sheet_without_relationship_is_rejected() {
        let xml = br#"<workbook><sheets><sheet name="A" sheetId="1"/></sheets></workbook>"#;
        let err = parse_workbook_sheets(xml).unwrap_err();
        assert!(matches!(err, XlsxError::MissingAttr("r:id")));
    }
}
