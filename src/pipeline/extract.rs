//! AcroForm field extraction using `lopdf`.
//!
//! Walks `/Root /AcroForm /Fields` depth-first. Non-terminal fields pass
//! their partial name and their inheritable entries (`/FT`, `/Ff`, `/V`,
//! `/Opt`, `/MaxLen`) down to their kids. A field is terminal when none of
//! its kids carries a `/T` of its own; kids without `/T` are just its widget
//! annotations.
//!
//! Parsing is synchronous and CPU-bound, so the async entry points run it on
//! the blocking pool.

use crate::error::FormMergeError;
use crate::model::{is_required, FieldKind, FieldRecord};
use crate::progress::ProgressCallback;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Read the fields of every document in `paths`, in order.
///
/// A missing or unparseable file aborts the whole run. A document without a
/// form contributes no fields.
pub async fn extract_fields(
    paths: &[PathBuf],
    progress: Option<&ProgressCallback>,
) -> Result<Vec<FieldRecord>, FormMergeError> {
    let total = paths.len();
    let mut all = Vec::new();

    for (i, path) in paths.iter().enumerate() {
        let shown = path.display().to_string();
        if let Some(cb) = progress {
            cb.on_file_start(i + 1, total, &shown);
        }

        let fields = extract_file(path).await?;
        info!("Extracted {} fields from {}", fields.len(), shown);
        if let Some(cb) = progress {
            cb.on_file_extracted(&shown, fields.len());
        }
        all.extend(fields);
    }

    info!("Total fields extracted: {}", all.len());
    Ok(all)
}

/// Read the fields of one document.
pub async fn extract_file(path: &Path) -> Result<Vec<FieldRecord>, FormMergeError> {
    if !path.exists() {
        return Err(FormMergeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_file_blocking(&owned))
        .await
        .map_err(|e| FormMergeError::Internal(format!("Extraction task panicked: {e}")))?
}

fn extract_file_blocking(path: &Path) -> Result<Vec<FieldRecord>, FormMergeError> {
    let document = Document::load(path).map_err(|e| {
        if !path.exists() {
            return FormMergeError::FileNotFound {
                path: path.to_path_buf(),
            };
        }
        error!("Error processing {}: {}", path.display(), e);
        FormMergeError::CorruptPdf {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }
    })?;

    Ok(fields_from_document(&document, &source_name(path)))
}

/// Read the fields of an in-memory document. `source_name` is recorded as
/// each field's `source_pdf`.
pub fn extract_from_bytes(bytes: &[u8], source_name: &str) -> Result<Vec<FieldRecord>, FormMergeError> {
    let document = Document::load_mem(bytes).map_err(|e| FormMergeError::CorruptPdf {
        path: PathBuf::from(source_name),
        detail: e.to_string(),
    })?;
    Ok(fields_from_document(&document, source_name))
}

/// File name without directories; the whole path if it has none.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Every terminal field of `document`, in `/Fields` order.
pub fn fields_from_document(document: &Document, source: &str) -> Vec<FieldRecord> {
    let Some(roots) = field_roots(document) else {
        warn!("No form fields found in {}", source);
        return Vec::new();
    };

    let walker = Walker {
        document,
        source,
        pages: PageIndex::build(document),
    };
    let mut visited = HashSet::new();
    let mut out = Vec::new();

    for root in roots {
        let Object::Reference(id) = root else {
            debug!("Skipping direct object in /Fields of {}", source);
            continue;
        };
        walker.walk(*id, &Inherited::default(), &mut visited, &mut out);
    }

    if out.is_empty() {
        warn!("No form fields found in {}", source);
    }
    out
}

fn field_roots(document: &Document) -> Option<&Vec<Object>> {
    let catalog = document.catalog().ok()?;
    let acroform = resolve(document, catalog.get(b"AcroForm").ok()?)?.as_dict().ok()?;
    resolve(document, acroform.get(b"Fields").ok()?)?.as_array().ok()
}

/// Follow references until a direct object.
fn resolve<'a>(document: &'a Document, mut object: &'a Object) -> Option<&'a Object> {
    for _ in 0..16 {
        match object {
            Object::Reference(id) => object = document.get_object(*id).ok()?,
            direct => return Some(direct),
        }
    }
    None
}

/// Entries a field inherits from its ancestors.
#[derive(Clone, Default)]
struct Inherited<'a> {
    name: Option<String>,
    field_type: Option<FieldKind>,
    flags: Option<i64>,
    value: Option<&'a Object>,
    options: Option<&'a Object>,
    max_length: Option<i64>,
}

struct Walker<'a> {
    document: &'a Document,
    source: &'a str,
    pages: PageIndex,
}

impl<'a> Walker<'a> {
    fn walk(
        &self,
        id: ObjectId,
        parent: &Inherited<'a>,
        visited: &mut HashSet<ObjectId>,
        out: &mut Vec<FieldRecord>,
    ) {
        if !visited.insert(id) {
            warn!("Field tree of {} loops at object {:?}", self.source, id);
            return;
        }
        let Some(dict) = self.dict(id) else {
            return;
        };

        let here = self.inherit(dict, parent);

        let mut field_kids = Vec::new();
        let mut widget_kids = Vec::new();
        for kid in self.kids(dict) {
            match self.dict(kid) {
                Some(kid_dict) if kid_dict.has(b"T") => field_kids.push(kid),
                Some(_) => widget_kids.push(kid),
                None => {}
            }
        }

        if !field_kids.is_empty() {
            for kid in field_kids {
                self.walk(kid, &here, visited, out);
            }
            return;
        }

        let Some(name) = here.name.clone().filter(|n| !n.is_empty()) else {
            debug!("Skipping unnamed field {:?} in {}", id, self.source);
            return;
        };

        let mut record = FieldRecord::new(name, self.source, here.field_type.unwrap_or_default());
        record.required = here.flags.is_some_and(is_required);
        record.value = here.value.and_then(|v| self.value_text(v));
        record.options = here.options.and_then(|o| self.option_list(o));
        record.max_length = here
            .max_length
            .filter(|&n| n > 0)
            .and_then(|n| u32::try_from(n).ok());
        record.page = std::iter::once(id)
            .chain(widget_kids)
            .find_map(|w| self.page_of(w));
        out.push(record);
    }

    fn inherit(&self, dict: &'a Dictionary, parent: &Inherited<'a>) -> Inherited<'a> {
        let partial = self.get(dict, b"T").and_then(|o| o.as_str().ok()).map(decode_text);
        let name = match (&parent.name, partial) {
            (Some(p), Some(t)) => Some(format!("{p}.{t}")),
            (None, Some(t)) => Some(t),
            (p, None) => p.clone(),
        };

        Inherited {
            name,
            field_type: self
                .get(dict, b"FT")
                .and_then(|o| o.as_name().ok())
                .map(|n| FieldKind::from_pdf_type(&String::from_utf8_lossy(n)))
                .or(parent.field_type),
            flags: self
                .get(dict, b"Ff")
                .and_then(|o| o.as_i64().ok())
                .or(parent.flags),
            value: self.get(dict, b"V").or(parent.value),
            options: self.get(dict, b"Opt").or(parent.options),
            max_length: self
                .get(dict, b"MaxLen")
                .and_then(|o| o.as_i64().ok())
                .or(parent.max_length),
        }
    }

    fn dict(&self, id: ObjectId) -> Option<&'a Dictionary> {
        self.document.get_object(id).ok()?.as_dict().ok()
    }

    fn get(&self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
        resolve(self.document, dict.get(key).ok()?)
    }

    fn kids(&self, dict: &'a Dictionary) -> Vec<ObjectId> {
        self.get(dict, b"Kids")
            .and_then(|o| o.as_array().ok())
            .map(|kids| kids.iter().filter_map(|k| k.as_reference().ok()).collect())
            .unwrap_or_default()
    }

    /// Current value as text: strings decoded, names without the slash,
    /// arrays (multi-select) joined with ", ".
    fn value_text(&self, value: &Object) -> Option<String> {
        let text = match value {
            Object::String(bytes, _) => decode_text(bytes),
            Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
            Object::Integer(i) => i.to_string(),
            Object::Real(r) => r.to_string(),
            Object::Boolean(b) => b.to_string(),
            Object::Array(items) => items
                .iter()
                .filter_map(|item| resolve(self.document, item))
                .filter_map(|item| self.value_text(item))
                .collect::<Vec<_>>()
                .join(", "),
            _ => return None,
        };
        Some(text).filter(|t| !t.is_empty())
    }

    /// `/Opt` display texts. Entries may be plain strings or
    /// `[export, display]` pairs.
    fn option_list(&self, options: &Object) -> Option<Vec<String>> {
        let items = options.as_array().ok()?;
        let list: Vec<String> = items
            .iter()
            .filter_map(|item| match resolve(self.document, item)? {
                Object::String(bytes, _) => Some(decode_text(bytes)),
                Object::Array(pair) => pair
                    .last()
                    .and_then(|d| resolve(self.document, d))
                    .and_then(|d| d.as_str().ok())
                    .map(decode_text),
                _ => None,
            })
            .collect();
        Some(list).filter(|l| !l.is_empty())
    }

    fn page_of(&self, widget: ObjectId) -> Option<u32> {
        if let Some(&page) = self.pages.by_annotation.get(&widget) {
            return Some(page);
        }
        let page_ref = self.dict(widget)?.get(b"P").ok()?.as_reference().ok()?;
        self.pages.by_page.get(&page_ref).copied()
    }
}

/// Page numbers (1-based) by page object and by annotation object.
struct PageIndex {
    by_page: HashMap<ObjectId, u32>,
    by_annotation: HashMap<ObjectId, u32>,
}

impl PageIndex {
    fn build(document: &Document) -> Self {
        let mut by_page = HashMap::new();
        let mut by_annotation = HashMap::new();

        for (number, page_id) in document.get_pages() {
            by_page.insert(page_id, number);
            let annots = document
                .get_object(page_id)
                .ok()
                .and_then(|p| p.as_dict().ok())
                .and_then(|p| p.get(b"Annots").ok())
                .and_then(|a| resolve(document, a))
                .and_then(|a| a.as_array().ok());
            for annot in annots.into_iter().flatten() {
                if let Ok(id) = annot.as_reference() {
                    by_annotation.entry(id).or_insert(number);
                }
            }
        }

        Self {
            by_page,
            by_annotation,
        }
    }
}

/// Decode a PDF text string: UTF-16BE with a byte-order mark, else UTF-8,
/// else Latin-1 as an approximation of PDFDocEncoding.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    /// A one-page document whose AcroForm lists `fields`. Widgets listed in
    /// `annots` are attached to the page.
    struct FormBuilder {
        doc: Document,
        page_id: ObjectId,
        fields: Vec<Object>,
        annots: Vec<Object>,
    }

    impl FormBuilder {
        fn new() -> Self {
            let mut doc = Document::with_version("1.5");
            let page_id = doc.new_object_id();
            Self {
                doc,
                page_id,
                fields: Vec::new(),
                annots: Vec::new(),
            }
        }

        fn add(&mut self, dict: Dictionary) -> ObjectId {
            self.doc.add_object(dict)
        }

        fn root_field(&mut self, dict: Dictionary) -> ObjectId {
            let id = self.add(dict);
            self.fields.push(id.into());
            id
        }

        fn on_page(&mut self, id: ObjectId) {
            self.annots.push(id.into());
        }

        fn finish(mut self) -> Document {
            let pages_id = self.doc.new_object_id();
            self.doc.objects.insert(
                self.page_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Annots" => self.annots,
                }),
            );
            self.doc.objects.insert(
                pages_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => vec![self.page_id.into()],
                    "Count" => 1,
                }),
            );
            let acroform = self.doc.add_object(dictionary! { "Fields" => self.fields });
            let catalog = self.doc.add_object(dictionary! {
                "Type" => "Catalog",
                "Pages" => pages_id,
                "AcroForm" => acroform,
            });
            self.doc.trailer.set("Root", catalog);
            self.doc
        }
    }

    fn text(s: &str) -> Object {
        Object::string_literal(s)
    }

    #[test]
    fn reads_flat_fields() {
        let mut b = FormBuilder::new();
        let name = b.root_field(dictionary! {
            "FT" => "Tx",
            "T" => text("Applicant Name"),
            "Ff" => 2,
            "MaxLen" => 40,
            "V" => text("Ada"),
        });
        b.on_page(name);
        b.root_field(dictionary! {
            "FT" => "Ch",
            "T" => text("State"),
            "Opt" => vec![text("CA"), vec![text("ny"), text("NY")].into()],
        });
        b.root_field(dictionary! { "FT" => "Sig", "T" => text("Signature") });

        let fields = fields_from_document(&b.finish(), "app.pdf");

        assert_eq!(fields.len(), 3);
        let first = &fields[0];
        assert_eq!(first.field_name, "Applicant Name");
        assert_eq!(first.source_pdf, "app.pdf");
        assert_eq!(first.field_type, FieldKind::Text);
        assert!(first.required);
        assert_eq!(first.max_length, Some(40));
        assert_eq!(first.value.as_deref(), Some("Ada"));
        assert_eq!(first.page, Some(1));

        assert_eq!(fields[1].field_type, FieldKind::Choice);
        assert_eq!(fields[1].options, Some(vec!["CA".to_string(), "NY".to_string()]));
        assert!(!fields[1].required);
        assert_eq!(fields[1].page, None);
        assert_eq!(fields[2].field_type, FieldKind::Signature);
    }

    #[test]
    fn kids_inherit_type_and_qualified_name() {
        let mut b = FormBuilder::new();
        let first = b.add(dictionary! { "T" => text("First") });
        let last = b.add(dictionary! { "T" => text("Last"), "Ff" => 0 });
        b.root_field(dictionary! {
            "FT" => "Tx",
            "Ff" => 2,
            "T" => text("applicant"),
            "Kids" => vec![first.into(), last.into()],
        });

        let fields = fields_from_document(&b.finish(), "f.pdf");

        let names: Vec<&str> = fields.iter().map(|f| f.field_name.as_str()).collect();
        assert_eq!(names, vec!["applicant.First", "applicant.Last"]);
        assert_eq!(fields[0].field_type, FieldKind::Text);
        assert!(fields[0].required);
        assert!(!fields[1].required);
    }

    #[test]
    fn widget_kids_do_not_split_a_field() {
        let mut b = FormBuilder::new();
        let page_id = b.page_id;
        let yes = b.add(dictionary! { "Subtype" => "Widget", "P" => page_id });
        let no = b.add(dictionary! { "Subtype" => "Widget" });
        b.root_field(dictionary! {
            "FT" => "Btn",
            "T" => text("Married"),
            "V" => "Yes",
            "Kids" => vec![yes.into(), no.into()],
        });

        let fields = fields_from_document(&b.finish(), "f.pdf");

        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_type, FieldKind::Button);
        assert_eq!(fields[0].value.as_deref(), Some("Yes"));
        assert_eq!(fields[0].page, Some(1));
    }

    #[test]
    fn unknown_type_and_missing_type_are_text() {
        let mut b = FormBuilder::new();
        b.root_field(dictionary! { "FT" => "Zz", "T" => text("Odd") });
        b.root_field(dictionary! { "T" => text("Plain") });

        let fields = fields_from_document(&b.finish(), "f.pdf");

        assert!(fields.iter().all(|f| f.field_type == FieldKind::Text));
        assert!(fields.iter().all(|f| f.max_length.is_none() && f.options.is_none()));
    }

    #[test]
    fn document_without_form_has_no_fields() {
        let mut doc = Document::with_version("1.5");
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog" });
        doc.trailer.set("Root", catalog);

        assert!(fields_from_document(&doc, "plain.pdf").is_empty());
    }

    #[test]
    fn reads_saved_bytes() {
        let mut b = FormBuilder::new();
        b.root_field(dictionary! { "FT" => "Tx", "T" => text("Email") });
        let mut doc = b.finish();
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let fields = extract_from_bytes(&bytes, "mem.pdf").unwrap();

        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_name, "Email");
        assert_eq!(fields[0].source_pdf, "mem.pdf");
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let err = extract_from_bytes(b"definitely not a pdf", "junk.pdf").unwrap_err();
        assert!(matches!(err, FormMergeError::CorruptPdf { .. }));
    }

    #[test]
    fn decodes_text_strings() {
        assert_eq!(decode_text(b"Name"), "Name");
        assert_eq!(decode_text(&[0xFE, 0xFF, 0x00, 0x4E, 0x00, 0xE9]), "Né");
        assert_eq!(decode_text(&[0x43, 0x61, 0x66, 0xE9]), "Café");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = extract_file(Path::new("/no/such/form.pdf")).await.unwrap_err();
        assert!(matches!(err, FormMergeError::FileNotFound { .. }));
    }

    #[test]
    fn source_name_strips_directories() {
        assert_eq!(source_name(Path::new("/tmp/forms/w9.pdf")), "w9.pdf");
    }
}
