//! Worksheet reconstruction from an `.xlsx` archive.
//!
//! The downloaded exchange reports sometimes carry XML that a strict parser
//! rejects. The first worksheet is read with quick-xml; if that fails the
//! same cells are lifted with patterns straight from the raw XML text. Both
//! paths resolve shared strings the same way and produce the same grid for
//! well-formed input.

use crate::error::ParseFailure;
use crate::models::RawTable;
use anyhow::bail;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";
const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";

/// row number → column number → cell text
type Grid = BTreeMap<u32, BTreeMap<u32, String>>;

/// "A" → 1, "Z" → 26, "AA" → 27
pub fn col_to_num(letters: &str) -> u32 {
    letters
        .bytes()
        .take_while(u8::is_ascii_uppercase)
        .fold(0, |acc, b| acc * 26 + u32::from(b - b'A' + 1))
}

/// "BC12" → (55, Some(12))
fn split_cell_ref(r: &str) -> Option<(u32, Option<u32>)> {
    let letters = r.bytes().take_while(u8::is_ascii_uppercase).count();
    if letters == 0 {
        return None;
    }
    Some((col_to_num(&r[..letters]), r[letters..].parse().ok()))
}

fn unescape_lossy(s: &str) -> String {
    quick_xml::escape::unescape(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn resolve_cell(cell_type: &str, value: &str, inline: &str, shared: &[String]) -> String {
    match cell_type {
        "s" => value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .cloned()
            .unwrap_or_else(|| value.to_string()),
        "inlineStr" => inline.to_string(),
        _ => value.to_string(),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

// ── Shared strings ────────────────────────────────────────────────────────────

fn shared_strings_xml(xml: &str) -> anyhow::Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    let mut depth: i64 = 0;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"si" => current = Some(String::new()),
                    b"rPh" => in_phonetic = true,
                    b"t" => in_t = !in_phonetic,
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"si" {
                    out.push(String::new());
                }
            }
            Event::Text(t) => {
                if in_t {
                    if let Some(s) = current.as_mut() {
                        s.push_str(&t.unescape()?);
                    }
                }
            }
            Event::End(e) => {
                depth -= 1;
                match e.local_name().as_ref() {
                    b"si" => out.extend(current.take()),
                    b"rPh" => in_phonetic = false,
                    b"t" => in_t = false,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if depth != 0 {
        bail!("{} unclosed element(s) in shared strings", depth);
    }
    Ok(out)
}

static SI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<si\b[^>]*?(?:/>|>(.*?)</si>)").expect("si regex must compile")
});
static PHONETIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rPh\b.*?</rPh>").expect("rPh regex must compile"));
static T: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<t\b[^>]*>(.*?)</t>").expect("t regex must compile"));

fn concat_t(fragment: &str) -> String {
    let fragment = PHONETIC.replace_all(fragment, "");
    T.captures_iter(&fragment)
        .map(|c| unescape_lossy(&c[1]))
        .collect()
}

fn shared_strings_fallback(xml: &str) -> Vec<String> {
    SI.captures_iter(xml)
        .map(|c| c.get(1).map(|m| concat_t(m.as_str())).unwrap_or_default())
        .collect()
}

fn shared_strings(xml: &str) -> Vec<String> {
    match shared_strings_xml(xml) {
        Ok(strings) => strings,
        Err(e) => {
            warn!("Shared strings XML is malformed ({}), using pattern extraction", e);
            shared_strings_fallback(xml)
        }
    }
}

// ── Worksheet: XML parser ─────────────────────────────────────────────────────

#[derive(Default)]
struct CellState {
    col: u32,
    cell_type: String,
    value: String,
    inline: String,
}

fn worksheet_xml(xml: &str, shared: &[String]) -> anyhow::Result<Grid> {
    let mut reader = Reader::from_str(xml);
    let mut grid = Grid::new();
    let mut depth: i64 = 0;

    let mut row_num: u32 = 0;
    let mut last_col: u32 = 0;
    let mut cell: Option<CellState> = None;
    let mut in_v = false;
    let mut in_inline = false;
    let mut in_inline_t = false;

    let mut open_row = |e: &BytesStart<'_>, row_num: &mut u32, last_col: &mut u32| {
        *row_num = attr(e, b"r")
            .and_then(|r| r.parse().ok())
            .unwrap_or(*row_num + 1);
        *last_col = 0;
    };
    let cell_col = |e: &BytesStart<'_>, last_col: u32| {
        attr(e, b"r")
            .and_then(|r| split_cell_ref(&r))
            .map(|(col, _)| col)
            .unwrap_or(last_col + 1)
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"row" => open_row(&e, &mut row_num, &mut last_col),
                    b"c" => {
                        let col = cell_col(&e, last_col);
                        last_col = col;
                        cell = Some(CellState {
                            col,
                            cell_type: attr(&e, b"t").unwrap_or_default(),
                            ..CellState::default()
                        });
                    }
                    b"v" => in_v = cell.is_some(),
                    b"is" => in_inline = cell.is_some(),
                    b"t" => in_inline_t = in_inline,
                    _ => {}
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => open_row(&e, &mut row_num, &mut last_col),
                b"c" => last_col = cell_col(&e, last_col),
                _ => {}
            },
            Event::Text(t) => {
                if let Some(c) = cell.as_mut() {
                    if in_v {
                        c.value.push_str(&t.unescape()?);
                    } else if in_inline_t {
                        c.inline.push_str(&t.unescape()?);
                    }
                }
            }
            Event::End(e) => {
                depth -= 1;
                match e.local_name().as_ref() {
                    b"v" => in_v = false,
                    b"t" => in_inline_t = false,
                    b"is" => in_inline = false,
                    b"c" => {
                        if let Some(c) = cell.take() {
                            let text = resolve_cell(&c.cell_type, &c.value, &c.inline, shared);
                            if !text.is_empty() {
                                grid.entry(row_num).or_default().insert(c.col, text);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        bail!("{} unclosed element(s) in worksheet", depth);
    }
    Ok(grid)
}

// ── Worksheet: pattern fallback ───────────────────────────────────────────────

static ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<row\b([^>]*?)(?:/>|>(.*?)</row>)").expect("row regex must compile")
});
static ROW_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\br="(\d+)""#).expect("row ref regex must compile"));
static CELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").expect("cell regex must compile")
});
static CELL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\br="([A-Z]+\d*)""#).expect("cell ref regex must compile"));
static CELL_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bt="([^"]*)""#).expect("cell type regex must compile"));
static V: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<v>(.*?)</v>").expect("v regex must compile"));
static IS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<is>(.*?)</is>").expect("is regex must compile"));

fn worksheet_fallback(xml: &str, shared: &[String]) -> Grid {
    let mut grid = Grid::new();
    let mut row_num: u32 = 0;
    for row in ROW.captures_iter(xml) {
        // Rows and cells without a reference follow the previous one.
        row_num = ROW_REF
            .captures(&row[1])
            .and_then(|r| r[1].parse().ok())
            .unwrap_or(row_num + 1);
        let body = row.get(2).map_or("", |m| m.as_str());

        let mut last_col: u32 = 0;
        for c in CELL.captures_iter(body) {
            let attrs = &c[1];
            let col = CELL_REF
                .captures(attrs)
                .and_then(|r| split_cell_ref(&r[1]))
                .map_or(last_col + 1, |(col, _)| col);
            last_col = col;
            let cell_type = CELL_TYPE.captures(attrs).map_or(String::new(), |t| t[1].to_string());
            let inner = c.get(2).map_or("", |m| m.as_str());
            let value = V
                .captures(inner)
                .map(|v| unescape_lossy(&v[1]))
                .unwrap_or_default();
            let inline = IS
                .captures(inner)
                .map(|i| concat_t(&i[1]))
                .unwrap_or_default();

            let text = resolve_cell(&cell_type, &value, &inline, shared);
            if !text.is_empty() {
                grid.entry(row_num).or_default().insert(col, text);
            }
        }
    }
    grid
}

// ── Table assembly ────────────────────────────────────────────────────────────

fn looks_numeric(cell: &str) -> bool {
    let digits: String = cell.chars().filter(|c| *c != '.' && *c != '-').collect();
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn into_table(grid: Grid) -> Result<RawTable, ParseFailure> {
    let cols: BTreeSet<u32> = grid.values().flat_map(|r| r.keys().copied()).collect();
    let mut matrix: Vec<Vec<String>> = grid
        .values()
        .filter(|r| !r.is_empty())
        .map(|r| cols.iter().map(|c| r.get(c).cloned().unwrap_or_default()).collect())
        .collect();
    if matrix.is_empty() {
        return Err(ParseFailure::NoRows);
    }

    let header_like = matrix[0]
        .iter()
        .filter(|c| !c.is_empty())
        .all(|c| !looks_numeric(c));
    let header = if header_like && matrix.len() > 1 {
        matrix.remove(0)
    } else {
        (0..cols.len()).map(|i| format!("Column_{i}")).collect()
    };

    debug!("Worksheet: {} columns, {} rows", header.len(), matrix.len());
    RawTable::new(header, matrix).ok_or(ParseFailure::NoRows)
}

// ── Archive ───────────────────────────────────────────────────────────────────

fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, ParseFailure> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

static FIRST_SHEET_RID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(?:\w+:)?sheet\b[^>]*?\s(?:\w+:)?id="([^"]+)""#)
        .expect("sheet rid regex must compile")
});
static RELATIONSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?Relationship\b([^>]*)>").expect("rel regex must compile"));
static REL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bId="([^"]+)""#).expect("rel id regex must compile"));
static REL_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bTarget="([^"]+)""#).expect("rel target regex must compile"));

/// Part name of the first `<sheet>` in `workbook.xml`, via the workbook rels.
fn sheet_from_workbook(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<Option<String>, ParseFailure> {
    let Some(workbook) = read_part(archive, WORKBOOK)? else {
        return Ok(None);
    };
    let Some(rels) = read_part(archive, WORKBOOK_RELS)? else {
        return Ok(None);
    };
    let Some(rid) = FIRST_SHEET_RID.captures(&workbook).map(|c| c[1].to_string()) else {
        return Ok(None);
    };

    let target = RELATIONSHIP.captures_iter(&rels).find_map(|rel| {
        let attrs = &rel[1];
        let id = REL_ID.captures(attrs)?;
        if &id[1] != rid.as_str() {
            return None;
        }
        REL_TARGET.captures(attrs).map(|t| t[1].to_string())
    });
    Ok(target.map(|t| match t.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{t}"),
    }))
}

/// Trailing number of `sheetN.xml`; unnumbered parts sort last.
fn sheet_number(name: &str) -> u32 {
    name.trim_end_matches(".xml")
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|d| d.parse().ok())
        .unwrap_or(u32::MAX)
}

/// The workbook's first sheet; without workbook metadata, the lowest
/// numbered worksheet part.
fn worksheet_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<Option<String>, ParseFailure> {
    if let Some(part) = sheet_from_workbook(archive)? {
        if archive.file_names().any(|n| n == part) {
            return Ok(Some(part));
        }
        warn!("Workbook points at missing part {}", part);
    }

    let mut sheets: Vec<(u32, &str)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/") && n.ends_with(".xml") && !n.contains("_rels"))
        .map(|n| (sheet_number(n), n))
        .collect();
    sheets.sort_unstable();
    Ok(sheets.first().map(|(_, n)| n.to_string()))
}

/// Reconstruct the first worksheet of an `.xlsx` archive.
pub fn parse(bytes: &[u8]) -> Result<RawTable, ParseFailure> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let shared = read_part(&mut archive, SHARED_STRINGS)?
        .map(|xml| shared_strings(&xml))
        .unwrap_or_default();
    let sheet = worksheet_part(&mut archive)?
        .ok_or_else(|| ParseFailure::MissingPart(FIRST_SHEET.to_string()))?;
    let xml = read_part(&mut archive, &sheet)?.ok_or(ParseFailure::MissingPart(sheet))?;

    let grid = match worksheet_xml(&xml, &shared) {
        Ok(grid) => grid,
        Err(e) => {
            warn!("Worksheet XML is malformed ({}), using pattern extraction", e);
            worksheet_fallback(&xml, &shared)
        }
    };
    into_table(grid)
}

pub fn parse_file(path: &Path) -> Result<RawTable, ParseFailure> {
    let bytes = std::fs::read(path)?;
    parse(&bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    fn build_archive(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            w.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            w.write_all(body.as_bytes()).unwrap();
        }
        w.finish().unwrap().into_inner()
    }

    fn one_cell(text: &str) -> String {
        sheet(&format!(
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Symbol</t></is></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>{text}</t></is></c></row>"#
        ))
    }

    /// Minimal in-memory workbook with one sheet.
    pub(crate) fn build_xlsx(shared: Option<&str>, sheet: &str) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = zip::write::SimpleFileOptions::default();
        if let Some(s) = shared {
            w.start_file(SHARED_STRINGS, opts).unwrap();
            w.write_all(s.as_bytes()).unwrap();
        }
        w.start_file(FIRST_SHEET, opts).unwrap();
        w.write_all(sheet.as_bytes()).unwrap();
        w.finish().unwrap().into_inner()
    }

    pub(crate) fn sst(strings: &[&str]) -> String {
        let items: String = strings
            .iter()
            .map(|s| format!("<si><t>{}</t></si>", quick_xml::escape::escape(*s)))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{items}</sst>"#
        )
    }

    pub(crate) fn sheet(rows: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{rows}</sheetData></worksheet>"#
        )
    }

    const SHARED: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="5" uniqueCount="5"><si><t>Symbol</t></si><si><t>Volume</t></si><si><r><t>P</t></r><r><t>TT</t></r></si><si><t>AOT</t></si><si><t xml:space="preserve">B &amp; C</t></si></sst>"#;

    const ROWS: &str = r#"
<row r="3" spans="1:2"><c r="B3"><v>987000</v></c><c r="A3" t="s"><v>3</v></c></row>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="inlineStr"><is><t>Note</t></is></c></row>
<row r="2"><c r="A2" t="s" s="1"><v>2</v></c><c r="B2"><v>1234500</v></c><c r="C2" t="s"><v>4</v></c><c r="D2" s="3"/></row>
"#;

    fn strings() -> Vec<String> {
        shared_strings(SHARED)
    }

    #[test]
    fn shared_strings_join_rich_runs_and_unescape() {
        assert_eq!(strings(), vec!["Symbol", "Volume", "PTT", "AOT", "B & C"]);
        assert_eq!(shared_strings_fallback(SHARED), strings());
    }

    #[test]
    fn rebuilds_rows_and_columns_in_sheet_order() {
        let bytes = build_xlsx(Some(SHARED), &sheet(ROWS));
        let t = parse(&bytes).unwrap();
        assert_eq!(t.columns(), ["Symbol", "Volume", "Note"]);
        assert_eq!(t.rows()[0], vec!["PTT", "1234500", "B & C"]);
        assert_eq!(t.rows()[1], vec!["AOT", "987000", ""]);
    }

    #[test]
    fn fallback_agrees_with_xml_parser_on_well_formed_input() {
        let xml = sheet(ROWS);
        let shared = strings();
        let strict = worksheet_xml(&xml, &shared).unwrap();
        assert_eq!(worksheet_fallback(&xml, &shared), strict);
        assert_eq!(strict[&2][&3], "B & C");
    }

    #[test]
    fn malformed_worksheet_uses_fallback() {
        let broken = sheet(ROWS).replace("</worksheet>", "");
        assert!(worksheet_xml(&broken, &strings()).is_err());

        let t = parse(&build_xlsx(Some(SHARED), &broken)).unwrap();
        assert_eq!(t.columns(), ["Symbol", "Volume", "Note"]);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn rows_and_cells_without_references_are_numbered_in_order() {
        let rows = r#"<row><c t="inlineStr"><is><t>Symbol</t></is></c><c t="inlineStr"><is><t>Last</t></is></c></row><row/><row><c t="inlineStr"><is><t>PTT</t></is></c><c><v>34.5</v></c></row><row r="7"><c r="B7"><v>1</v></c></row><row><c t="inlineStr"><is><t>AOT</t></is></c></row>"#;
        let xml = sheet(rows);
        let strict = worksheet_xml(&xml, &[]).unwrap();
        assert_eq!(strict.keys().copied().collect::<Vec<_>>(), [1, 3, 7, 8]);
        assert_eq!(strict[&3][&2], "34.5");
        assert_eq!(worksheet_fallback(&xml, &[]), strict);
    }

    #[test]
    fn first_sheet_comes_from_the_workbook() {
        let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="NVDR" sheetId="3" r:id="rId7"/><sheet name="Notes" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
        let rels = r#"<Relationships><Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/><Relationship Target="/xl/worksheets/sheet3.xml" Id="rId7" Type="worksheet"/></Relationships>"#;
        let bytes = build_archive(&[
            (WORKBOOK, workbook),
            (WORKBOOK_RELS, rels),
            (FIRST_SHEET, one_cell("NOTES").as_str()),
            ("xl/worksheets/sheet3.xml", one_cell("PTT").as_str()),
        ]);
        assert_eq!(parse(&bytes).unwrap().rows()[0], vec!["PTT"]);
    }

    #[test]
    fn without_workbook_lowest_sheet_number_wins() {
        let bytes = build_archive(&[
            ("xl/worksheets/sheet10.xml", one_cell("LATE").as_str()),
            ("xl/worksheets/sheet2.xml", one_cell("AOT").as_str()),
        ]);
        assert_eq!(parse(&bytes).unwrap().rows()[0], vec!["AOT"]);
        assert_eq!(sheet_number("xl/worksheets/sheet10.xml"), 10);
        assert_eq!(sheet_number("xl/worksheets/data.xml"), u32::MAX);
    }

    #[test]
    fn column_letters_sort_like_the_sheet() {
        assert_eq!(col_to_num("A"), 1);
        assert_eq!(col_to_num("Z"), 26);
        assert_eq!(col_to_num("AA"), 27);
        assert_eq!(col_to_num("AZ"), 52);
        assert_eq!(col_to_num("BA"), 53);

        let ordered = ["A", "B", "Z", "AA", "AB", "AZ", "BA", "ZZ", "AAA"];
        let mut shuffled = ["AZ", "B", "AAA", "Z", "BA", "A", "ZZ", "AB", "AA"];
        shuffled.sort_by_key(|c| col_to_num(c));
        assert_eq!(shuffled, ordered);
    }

    #[test]
    fn numeric_first_row_gets_positional_headers() {
        let rows = r#"<row r="1"><c r="A1"><v>1</v></c><c r="B1"><v>2.5</v></c></row><row r="2"><c r="A2"><v>3</v></c></row>"#;
        let t = parse(&build_xlsx(None, &sheet(rows))).unwrap();
        assert_eq!(t.columns(), ["Column_0", "Column_1"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[1], vec!["3", ""]);
    }

    #[test]
    fn failures_are_values() {
        assert!(matches!(parse(b"not a zip"), Err(ParseFailure::Archive(_))));
        assert!(matches!(
            parse(&build_xlsx(None, &sheet(""))),
            Err(ParseFailure::NoRows)
        ));

        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        w.start_file("docProps/app.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        w.write_all(b"<x/>").unwrap();
        let bytes = w.finish().unwrap().into_inner();
        assert!(matches!(parse(&bytes), Err(ParseFailure::MissingPart(_))));
    }
}
