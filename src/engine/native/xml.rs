use indexmap::IndexMap;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use std::ops::Range;

/// Attributes of one element keyed by qualified name, values kept escaped
pub type Attributes = IndexMap<String, String>;

/// One element located in a part, with the byte range it occupies
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpan {
    /// Bytes from `<` of the start tag to `>` of the end tag (or of the empty tag)
    pub range: Range<usize>,
    /// Name as written, including any prefix (`x:sheetProtection`)
    pub qualified_name: String,
    pub attributes: Attributes,
}

/// Look up an attribute by name.
///
/// An exact key match wins; otherwise a prefixed key whose local part equals
/// `name` is accepted (`r:id` for `id`).
pub fn attribute<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a str> {
    if let Some(value) = attributes.get(name) {
        return Some(value.as_str());
    }
    attributes
        .iter()
        .find(|(key, _)| key.rsplit_once(':').is_some_and(|(_, local)| local == name))
        .map(|(_, value)| value.as_str())
}

/// Unescape an attribute value (`&amp;` to `&` and so on); invalid escapes are kept verbatim
pub fn unescaped(value: &str) -> String {
    quick_xml::escape::unescape(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Every element with the given local name, in document order.
///
/// Nested matches inside a matched element are not reported.
pub fn find_elements(xml: &str, local_name: &str) -> quick_xml::Result<Vec<ElementSpan>> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Empty(e) if e.local_name().as_ref() == local_name.as_bytes() => {
                let end = reader.buffer_position() as usize;
                found.push(span(&e, start..end)?);
            }
            Event::Start(e) if e.local_name().as_ref() == local_name.as_bytes() => {
                let name = e.name().as_ref().to_vec();
                reader.read_to_end(QName(&name))?;
                let end = reader.buffer_position() as usize;
                found.push(span(&e, start..end)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(found)
}

/// First element with the given local name
pub fn find_element(xml: &str, local_name: &str) -> quick_xml::Result<Option<ElementSpan>> {
    Ok(find_elements(xml, local_name)?.into_iter().next())
}

fn span(element: &BytesStart<'_>, range: Range<usize>) -> quick_xml::Result<ElementSpan> {
    let mut attributes = Attributes::new();
    for attr in element.attributes() {
        let attr = attr?;
        attributes.insert(
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            String::from_utf8_lossy(&attr.value).into_owned(),
        );
    }

    Ok(ElementSpan {
        range,
        qualified_name: String::from_utf8_lossy(element.name().as_ref()).into_owned(),
        attributes,
    })
}

/// Render an empty element from a name and already-escaped attribute values
pub fn render_empty(qualified_name: &str, attributes: &Attributes) -> String {
    let mut out = format!("<{}", qualified_name);
    for (key, value) in attributes {
        out.push_str(&format!(" {}=\"{}\"", key, value));
    }
    out.push_str("/>");
    out
}

/// Replace `range` of `xml` with `replacement`
pub fn splice(xml: &str, range: Range<usize>, replacement: &str) -> String {
    let mut out = String::with_capacity(xml.len() + replacement.len());
    out.push_str(&xml[..range.start]);
    out.push_str(replacement);
    out.push_str(&xml[range.end..]);
    out
}

/// Whether a boolean attribute value is set (`1` or `true`)
pub fn is_true(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1") | Some("true"))
}
