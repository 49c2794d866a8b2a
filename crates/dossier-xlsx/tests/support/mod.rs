#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const SPREADSHEETML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Builds small `.xlsx` packages shaped like what Excel writes: content types, package and
/// workbook relationships, styles, optional shared strings and calc chain.
#[derive(Debug, Clone, Default)]
pub struct XlsxFixture {
    sheets: Vec<(String, String)>,
    shared_strings: Vec<String>,
    calc_chain: Option<String>,
}

impl XlsxFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet; `body` is everything inside `<worksheet>`.
    pub fn sheet(mut self, name: &str, body: &str) -> Self {
        self.sheets.push((name.to_string(), body.to_string()));
        self
    }

    pub fn shared_strings(mut self, items: &[&str]) -> Self {
        self.shared_strings = items.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add `xl/calcChain.xml` with one `<c>` per `(a1, sheet_id)` entry.
    pub fn calc_chain(mut self, cells: &[(&str, u32)]) -> Self {
        let body: String = cells
            .iter()
            .map(|(r, i)| format!(r#"<c r="{r}" i="{i}"/>"#))
            .collect();
        self.calc_chain = Some(format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="{SPREADSHEETML_NS}">{body}</calcChain>"#
        ));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut parts: Vec<(String, String)> = Vec::new();
        parts.push(("[Content_Types].xml".to_string(), self.content_types()));
        parts.push((
            "_rels/.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#
            ),
        ));
        parts.push((
            "docProps/core.xml".to_string(),
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:creator>Cabinet</dc:creator></cp:coreProperties>"#
                .to_string(),
        ));
        parts.push(("xl/workbook.xml".to_string(), self.workbook_xml()));
        parts.push(("xl/_rels/workbook.xml.rels".to_string(), self.workbook_rels()));
        for (idx, (_, body)) in self.sheets.iter().enumerate() {
            parts.push((
                format!("xl/worksheets/sheet{}.xml", idx + 1),
                worksheet_xml(body),
            ));
        }
        parts.push(("xl/styles.xml".to_string(), STYLES_XML.to_string()));
        if !self.shared_strings.is_empty() {
            let items: String = self
                .shared_strings
                .iter()
                .map(|s| format!("<si><t>{}</t></si>", escape(s)))
                .collect();
            parts.push((
                "xl/sharedStrings.xml".to_string(),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="{SPREADSHEETML_NS}" count="{n}" uniqueCount="{n}">{items}</sst>"#,
                    n = self.shared_strings.len()
                ),
            ));
        }
        if let Some(calc_chain) = &self.calc_chain {
            parts.push(("xl/calcChain.xml".to_string(), calc_chain.clone()));
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
        for (name, xml) in parts {
            zip.start_file(name, options).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn content_types(&self) -> String {
        let mut overrides = String::from(
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#,
        );
        for idx in 1..=self.sheets.len() {
            overrides.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{idx}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
        }
        if !self.shared_strings.is_empty() {
            overrides.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
        }
        if self.calc_chain.is_some() {
            overrides.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{overrides}</Types>"#
        )
    }

    fn workbook_xml(&self) -> String {
        let sheets: String = self
            .sheets
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| {
                format!(
                    r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                    escape(name),
                    idx + 1,
                    idx + 1
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{SPREADSHEETML_NS}" xmlns:r="{REL_NS}"><bookViews><workbookView activeTab="0"/></bookViews><sheets>{sheets}</sheets><calcPr calcId="191029"/></workbook>"#
        )
    }

    fn workbook_rels(&self) -> String {
        let mut rels: String = (1..=self.sheets.len())
            .map(|idx| {
                format!(
                    r#"<Relationship Id="rId{idx}" Type="{REL_NS}/worksheet" Target="worksheets/sheet{idx}.xml"/>"#
                )
            })
            .collect();
        let n = self.sheets.len();
        rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="{REL_NS}/styles" Target="styles.xml"/>"#,
            n + 1
        ));
        if !self.shared_strings.is_empty() {
            rels.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="{REL_NS}/sharedStrings" Target="sharedStrings.xml"/>"#,
                n + 2
            ));
        }
        if self.calc_chain.is_some() {
            rels.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="{REL_NS}/calcChain" Target="calcChain.xml"/>"#,
                n + 3
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
        )
    }
}

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="4"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/><xf numFmtId="0" fontId="0" fillId="1" borderId="0" xfId="0" applyFill="1"/><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment wrapText="1"/></xf></cellXfs></styleSheet>"#;

pub fn worksheet_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{SPREADSHEETML_NS}" xmlns:r="{REL_NS}">{body}</worksheet>"#
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Entry names in archive order.
pub fn entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect::<Vec<_>>()
}

/// Order of `file_names()` is not the central directory order, so walk indices instead.
pub fn entries_in_order(bytes: &[u8]) -> Vec<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Inflated bytes of `name`, if present.
pub fn read_part(bytes: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).ok()?;
    let mut out = Vec::new();
    file.read_to_end(&mut out).unwrap();
    Some(out)
}

pub fn read_part_string(bytes: &[u8], name: &str) -> String {
    String::from_utf8(read_part(bytes, name).unwrap_or_else(|| panic!("missing part {name}")))
        .unwrap()
}

/// Compressed bytes and CRC of `name` exactly as stored in the archive.
pub fn raw_part(bytes: &[u8], name: &str) -> (u32, Vec<u8>) {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    for i in 0..archive.len() {
        let mut file = archive.by_index_raw(i).unwrap();
        if file.name() == name {
            let crc = file.crc32();
            let mut out = Vec::new();
            file.read_to_end(&mut out).unwrap();
            return (crc, out);
        }
    }
    panic!("missing part {name}");
}
