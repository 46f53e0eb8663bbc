//! Editing of xlsx (OOXML) packages.
//!
//! The package is kept as its ordered zip parts. Protection is read from and
//! removed in the XML text of the workbook and sheet parts, so every other
//! byte of the document (formulas, styles, macros, charts) survives a save
//! untouched.

use super::password::PasswordVerifier;
use super::xml::{self, Attributes, ElementSpan};
use crate::engine::SaveMode;
use indexmap::IndexMap;
use std::io::{Cursor, Read, Write};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ROOT_RELS: &str = "_rels/.rels";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";
const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

/// Workbook protection attributes that lock something
const WORKBOOK_LOCKS: [&str; 3] = ["lockStructure", "lockWindows", "lockRevision"];

/// Errors while reading, editing or writing a package
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("not a valid zip package: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing part {0}")]
    MissingPart(String),

    #[error("part {part} is not valid XML: {reason}")]
    Xml { part: String, reason: String },

    #[error("the password is not correct")]
    InvalidPassword,

    #[error("password hash algorithm {0} is not supported")]
    UnsupportedAlgorithm(String),

    #[error("no sheet at index {0}")]
    NoSuchSheet(usize),
}

/// A sheet listed in the workbook part
#[derive(Debug, Clone, PartialEq)]
pub struct SheetEntry {
    pub name: String,
    /// Part holding the sheet, when its relationship resolves
    pub part: Option<String>,
}

/// An xlsx package held in memory
#[derive(Debug, Clone)]
pub struct XlsxPackage {
    parts: IndexMap<String, Vec<u8>>,
    workbook_part: String,
    sheets: Vec<SheetEntry>,
}

impl XlsxPackage {
    /// Read a package from zip bytes and locate its workbook and sheets
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = IndexMap::with_capacity(archive.len());

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            parts.insert(name, data);
        }

        let mut package = Self {
            parts,
            workbook_part: DEFAULT_WORKBOOK_PART.to_string(),
            sheets: Vec::new(),
        };
        package.workbook_part = package.find_workbook_part()?;
        package.sheets = package.read_sheet_list()?;

        // Surface unreadable protection markup at open time
        package.workbook_protection()?;
        for index in 0..package.sheets.len() {
            package.sheet_protection(index)?;
        }

        Ok(package)
    }

    pub fn workbook_part(&self) -> &str {
        &self.workbook_part
    }

    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Text of an XML part
    pub fn part_text(&self, name: &str) -> Result<&str, PackageError> {
        let bytes = self
            .parts
            .get(name)
            .ok_or_else(|| PackageError::MissingPart(name.to_string()))?;
        std::str::from_utf8(bytes).map_err(|_| PackageError::Xml {
            part: name.to_string(),
            reason: "not UTF-8".to_string(),
        })
    }

    fn set_part_text(&mut self, name: &str, text: String) {
        if let Some(bytes) = self.parts.get_mut(name) {
            *bytes = text.into_bytes();
        }
    }

    fn find_element(&self, part: &str, local_name: &str) -> Result<Option<ElementSpan>, PackageError> {
        let text = self.part_text(part)?;
        xml::find_element(text, local_name).map_err(|e| PackageError::Xml {
            part: part.to_string(),
            reason: e.to_string(),
        })
    }

    fn find_workbook_part(&self) -> Result<String, PackageError> {
        if self.parts.contains_key(ROOT_RELS) {
            for rel in self.relationships(ROOT_RELS)? {
                if rel.rel_type.ends_with(OFFICE_DOCUMENT_REL) {
                    return Ok(resolve_target("", &rel.target));
                }
            }
        }
        if self.parts.contains_key(DEFAULT_WORKBOOK_PART) {
            return Ok(DEFAULT_WORKBOOK_PART.to_string());
        }
        Err(PackageError::MissingPart(DEFAULT_WORKBOOK_PART.to_string()))
    }

    fn read_sheet_list(&self) -> Result<Vec<SheetEntry>, PackageError> {
        let workbook = self.part_text(&self.workbook_part)?;
        let elements = xml::find_elements(workbook, "sheet").map_err(|e| PackageError::Xml {
            part: self.workbook_part.clone(),
            reason: e.to_string(),
        })?;

        let rels_part = rels_part_for(&self.workbook_part);
        let relationships = if self.parts.contains_key(&rels_part) {
            self.relationships(&rels_part)?
        } else {
            Vec::new()
        };
        let base_dir = parent_dir(&self.workbook_part);

        Ok(elements
            .iter()
            .map(|element| {
                let name = xml::attribute(&element.attributes, "name")
                    .map(xml::unescaped)
                    .unwrap_or_default();
                let part = xml::attribute(&element.attributes, "id").and_then(|id| {
                    relationships
                        .iter()
                        .find(|rel| rel.id == id && !rel.external)
                        .map(|rel| resolve_target(base_dir, &rel.target))
                        .filter(|part| self.parts.contains_key(part))
                });
                SheetEntry { name, part }
            })
            .collect())
    }

    fn relationships(&self, rels_part: &str) -> Result<Vec<Relationship>, PackageError> {
        let text = self.part_text(rels_part)?;
        let elements = xml::find_elements(text, "Relationship").map_err(|e| PackageError::Xml {
            part: rels_part.to_string(),
            reason: e.to_string(),
        })?;

        Ok(elements
            .iter()
            .map(|element| {
                let get = |name: &str| {
                    xml::attribute(&element.attributes, name)
                        .map(xml::unescaped)
                        .unwrap_or_default()
                };
                Relationship {
                    id: get("Id"),
                    rel_type: get("Type"),
                    target: get("Target"),
                    external: get("TargetMode") == "External",
                }
            })
            .collect())
    }

    /// The `workbookProtection` element, if any
    pub fn workbook_protection(&self) -> Result<Option<ElementSpan>, PackageError> {
        self.find_element(&self.workbook_part, "workbookProtection")
    }

    /// The `sheetProtection` element of a sheet, if any
    pub fn sheet_protection(&self, index: usize) -> Result<Option<ElementSpan>, PackageError> {
        let sheet = self.sheets.get(index).ok_or(PackageError::NoSuchSheet(index))?;
        match &sheet.part {
            Some(part) => self.find_element(part, "sheetProtection"),
            None => Ok(None),
        }
    }

    pub fn structure_protected(&self) -> bool {
        self.workbook_lock_set("lockStructure")
    }

    pub fn windows_protected(&self) -> bool {
        self.workbook_lock_set("lockWindows")
    }

    fn workbook_lock_set(&self, lock: &str) -> bool {
        matches!(
            self.workbook_protection(),
            Ok(Some(span)) if xml::is_true(xml::attribute(&span.attributes, lock))
        )
    }

    pub fn sheet_protected(&self, index: usize) -> bool {
        matches!(
            self.sheet_protection(index),
            Ok(Some(span)) if is_sheet_lock(&span.attributes)
        )
    }

    pub fn unprotect_structure(&mut self, password: &str) -> Result<(), PackageError> {
        self.clear_workbook_lock("lockStructure", password)
    }

    pub fn unprotect_windows(&mut self, password: &str) -> Result<(), PackageError> {
        self.clear_workbook_lock("lockWindows", password)
    }

    /// Clear one workbook lock; the element goes away once nothing stays locked
    fn clear_workbook_lock(&mut self, lock: &str, password: &str) -> Result<(), PackageError> {
        let Some(mut span) = self.workbook_protection()? else {
            return Ok(());
        };
        verify(&span.attributes, "workbook", password)?;

        span.attributes.shift_remove(lock);
        let still_locked = WORKBOOK_LOCKS
            .iter()
            .any(|name| xml::is_true(xml::attribute(&span.attributes, name)));
        let replacement = if still_locked {
            xml::render_empty(&span.qualified_name, &span.attributes)
        } else {
            String::new()
        };

        let part = self.workbook_part.clone();
        let edited = xml::splice(self.part_text(&part)?, span.range, &replacement);
        self.set_part_text(&part, edited);
        Ok(())
    }

    pub fn unprotect_sheet(&mut self, index: usize, password: &str) -> Result<(), PackageError> {
        let Some(span) = self.sheet_protection(index)? else {
            return Ok(());
        };
        verify(&span.attributes, "", password)?;

        if let Some(part) = self.sheets[index].part.clone() {
            let edited = xml::splice(self.part_text(&part)?, span.range, "");
            self.set_part_text(&part, edited);
        }
        Ok(())
    }

    /// Check a password given at open time against the package's protections.
    ///
    /// Fails only when at least one protection carries a computable verifier
    /// and none of them accepts the password.
    pub fn check_password(&self, password: &str) -> Result<(), PackageError> {
        let mut verifiers = Vec::new();
        if let Some(span) = self.workbook_protection()? {
            verifiers.extend(PasswordVerifier::from_attributes(&span.attributes, "workbook"));
        }
        for index in 0..self.sheets.len() {
            if let Some(span) = self.sheet_protection(index)? {
                verifiers.extend(PasswordVerifier::from_attributes(&span.attributes, ""));
            }
        }

        let outcomes: Vec<bool> = verifiers.iter().filter_map(|v| v.matches(password)).collect();
        if !outcomes.is_empty() && !outcomes.contains(&true) {
            return Err(PackageError::InvalidPassword);
        }
        Ok(())
    }

    /// Serialize the package as zip bytes
    pub fn to_bytes(&self, mode: SaveMode) -> Result<Vec<u8>, PackageError> {
        let mut package = self.clone();
        if mode == SaveMode::Unprotected {
            package.remove_file_sharing()?;
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in &package.parts {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Drop the write-reservation password
    fn remove_file_sharing(&mut self) -> Result<(), PackageError> {
        let part = self.workbook_part.clone();
        if let Some(span) = self.find_element(&part, "fileSharing")? {
            let edited = xml::splice(self.part_text(&part)?, span.range, "");
            self.set_part_text(&part, edited);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    external: bool,
}

fn is_sheet_lock(attributes: &Attributes) -> bool {
    ["sheet", "content", "objects"]
        .iter()
        .any(|name| xml::is_true(xml::attribute(attributes, name)))
}

fn verify(attributes: &Attributes, prefix: &str, password: &str) -> Result<(), PackageError> {
    match PasswordVerifier::from_attributes(attributes, prefix) {
        None => Ok(()),
        Some(PasswordVerifier::Unsupported(name)) => Err(PackageError::UnsupportedAlgorithm(name)),
        Some(verifier) => match verifier.matches(password) {
            Some(true) => Ok(()),
            _ => Err(PackageError::InvalidPassword),
        },
    }
}

/// `xl/workbook.xml` -> `xl/_rels/workbook.xml.rels`
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve a relationship target against the source part's folder
fn resolve_target(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base_dir.is_empty() => target.to_string(),
        None => format!("{base_dir}/{target}"),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a two-sheet package with the given protection markup
    pub(crate) fn build_package(workbook_extra: &str, sheet1_extra: &str, sheet2_extra: &str) -> Vec<u8> {
        let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;
        let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{workbook_extra}<sheets><sheet name="Summary" sheetId="1" r:id="rId1"/><sheet name="R&amp;D" sheetId="2" r:id="rId2"/></sheets></workbook>"#
        );
        let workbook_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#;
        let sheet = |extra: &str| {
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData>{extra}<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#
            )
        };

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in [
            ("[Content_Types].xml", content_types.to_string()),
            ("_rels/.rels", root_rels.to_string()),
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", workbook_rels.to_string()),
            ("xl/worksheets/sheet1.xml", sheet(sheet1_extra)),
            ("xl/worksheets/sheet2.xml", sheet(sheet2_extra)),
        ] {
            writer.start_file(name, options).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_reads_sheet_list_and_parts() {
        let package = XlsxPackage::from_bytes(&build_package("", "", "")).unwrap();

        assert_eq!(package.workbook_part(), "xl/workbook.xml");
        assert_eq!(package.sheet_names(), vec!["Summary", "R&D"]);
        assert_eq!(package.sheets()[0].part.as_deref(), Some("xl/worksheets/sheet1.xml"));
        assert_eq!(package.sheets()[1].part.as_deref(), Some("xl/worksheets/sheet2.xml"));
        assert!(!package.structure_protected());
        assert!(!package.sheet_protected(0));
    }

    #[test]
    fn test_remove_sheet_protection_with_legacy_password() {
        let bytes = build_package("", r#"<sheetProtection password="83AF" sheet="1" objects="1"/>"#, "");
        let mut package = XlsxPackage::from_bytes(&bytes).unwrap();
        assert!(package.sheet_protected(0));

        assert!(matches!(
            package.unprotect_sheet(0, "wrong"),
            Err(PackageError::InvalidPassword)
        ));
        assert!(package.sheet_protected(0));

        package.unprotect_sheet(0, "password").unwrap();
        assert!(!package.sheet_protected(0));
        assert!(!package.part_text("xl/worksheets/sheet1.xml").unwrap().contains("sheetProtection"));
    }

    #[test]
    fn test_clear_one_workbook_lock_keeps_the_other() {
        let bytes = build_package(r#"<workbookProtection workbookPassword="83AF" lockStructure="1" lockWindows="1"/>"#, "", "");
        let mut package = XlsxPackage::from_bytes(&bytes).unwrap();
        assert!(package.structure_protected());
        assert!(package.windows_protected());

        package.unprotect_structure("password").unwrap();
        assert!(!package.structure_protected());
        assert!(package.windows_protected());

        package.unprotect_windows("password").unwrap();
        assert!(package.workbook_protection().unwrap().is_none());
    }

    #[test]
    fn test_check_password() {
        let bytes = build_package(
            r#"<workbookProtection workbookPassword="83AF" lockStructure="1"/>"#,
            r#"<sheetProtection password="DAA7" sheet="1"/>"#,
            r#"<sheetProtection sheet="1"/>"#,
        );
        let package = XlsxPackage::from_bytes(&bytes).unwrap();

        assert!(package.check_password("password").is_ok());
        assert!(package.check_password("secret").is_ok());
        assert!(matches!(package.check_password("nope"), Err(PackageError::InvalidPassword)));

        let unprotected = XlsxPackage::from_bytes(&build_package("", "", "")).unwrap();
        assert!(unprotected.check_password("anything").is_ok());
    }

    #[test]
    fn test_unsupported_algorithm_is_reported() {
        let bytes = build_package(
            "",
            r#"<sheetProtection algorithmName="MD5" hashValue="AAAA" saltValue="AAAA" spinCount="1" sheet="1"/>"#,
            "",
        );
        let mut package = XlsxPackage::from_bytes(&bytes).unwrap();
        assert!(package.check_password("x").is_ok());
        assert!(matches!(
            package.unprotect_sheet(0, "x"),
            Err(PackageError::UnsupportedAlgorithm(name)) if name == "MD5"
        ));
    }

    #[test]
    fn test_unprotected_save_drops_file_sharing() {
        let bytes = build_package(r#"<fileSharing readOnlyRecommended="1" reservationPassword="83AF"/>"#, "", "");
        let package = XlsxPackage::from_bytes(&bytes).unwrap();

        let plain = XlsxPackage::from_bytes(&package.to_bytes(SaveMode::PlainConversion).unwrap()).unwrap();
        assert!(plain.part_text("xl/workbook.xml").unwrap().contains("fileSharing"));

        let unlocked = XlsxPackage::from_bytes(&package.to_bytes(SaveMode::Unprotected).unwrap()).unwrap();
        assert!(!unlocked.part_text("xl/workbook.xml").unwrap().contains("fileSharing"));
        assert_eq!(unlocked.sheet_names(), vec!["Summary", "R&D"]);
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(resolve_target("xl/worksheets", "../drawings/d1.xml"), "xl/drawings/d1.xml");
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
    }

    #[test]
    fn test_rels_part_for() {
        assert_eq!(rels_part_for("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(rels_part_for("workbook.xml"), "_rels/workbook.xml.rels");
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(XlsxPackage::from_bytes(b"plain text"), Err(PackageError::Zip(_))));
    }
}
