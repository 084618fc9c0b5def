use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::recognition::Descriptor;

/// A registered identity. Stored as one JSON document per profile; fields
/// written through a partial update that are not part of the model are kept
/// in `extra` and round-trip untouched. So are known fields whose stored value
/// has the wrong type, which then shadow the typed field when serialized.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Profile {
    pub id: String,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub student_code: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub flagged: bool,
    pub photo_url: Option<String>,
    #[serde(default)]
    pub descriptor: Option<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Serialize for Profile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        typed_entry(&mut map, &self.extra, "name", &self.name)?;
        typed_entry(&mut map, &self.extra, "surname", &self.surname)?;
        typed_entry(&mut map, &self.extra, "student_code", &self.student_code)?;
        typed_entry(&mut map, &self.extra, "email", &self.email)?;
        typed_entry(&mut map, &self.extra, "flagged", &self.flagged)?;
        typed_entry(&mut map, &self.extra, "photo_url", &self.photo_url)?;
        if let Some(descriptor) = &self.descriptor {
            map.serialize_entry("descriptor", descriptor)?;
        }
        for (k, v) in &self.extra {
            if k != "id" {
                map.serialize_entry(k, v)?;
            }
        }
        map.end()
    }
}

// Each key is written once: a raw value kept in `extra` wins over the typed slot.
fn typed_entry<M: SerializeMap, T: Serialize>(
    map: &mut M,
    extra: &Map<String, Value>,
    key: &str,
    value: &T,
) -> Result<(), M::Error> {
    if extra.contains_key(key) {
        return Ok(());
    }
    map.serialize_entry(key, value)
}

/// Text metadata supplied alongside the photo at registration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ProfileFields {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub student_code: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub flagged: bool,
}

impl ProfileFields {
    /// Apply one multipart text field. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: String) {
        match key {
            "name" => self.name = Some(value),
            "surname" => self.surname = Some(value),
            "student_code" => self.student_code = Some(value),
            "email" => self.email = Some(value),
            "flagged" => self.flagged = parse_flag(&value),
            _ => {}
        }
    }
}

/// Form booleans: `true`, `1` and `t` (any case) are true, anything else false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "t")
}

impl Profile {
    pub fn new(id: String, fields: ProfileFields, photo_url: String, descriptor: Descriptor) -> Self {
        Self {
            id,
            name: fields.name,
            surname: fields.surname,
            student_code: fields.student_code,
            email: fields.email,
            flagged: fields.flagged,
            photo_url: Some(photo_url),
            descriptor: Some(descriptor),
            extra: Map::new(),
        }
    }

    /// Build a profile from a stored document.
    ///
    /// Documents may have been patched with arbitrary values, so every known
    /// field is read leniently: a value of the wrong type is left in `extra`
    /// instead of failing the whole read. `descriptor` is the exception; a
    /// malformed one is dropped so it never leaks into listings.
    pub fn from_document(id: String, mut doc: Map<String, Value>) -> Self {
        doc.remove("id");
        let descriptor = match doc.remove("descriptor") {
            Some(v) => parse_descriptor(&v).or_else(|| {
                tracing::warn!("Profile {} has a malformed descriptor; it will not be matched", id);
                None
            }),
            None => None,
        };
        let name = take_string(&mut doc, "name");
        let surname = take_string(&mut doc, "surname");
        let student_code = take_string(&mut doc, "student_code");
        let email = take_string(&mut doc, "email");
        let photo_url = take_string(&mut doc, "photo_url");
        let flagged = match doc.remove("flagged") {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => parse_flag(&s),
            Some(Value::Null) | None => false,
            Some(other) => {
                doc.insert("flagged".to_string(), other);
                false
            }
        };
        Self {
            id,
            name,
            surname,
            student_code,
            email,
            flagged,
            photo_url,
            descriptor,
            extra: doc,
        }
    }

    /// The stored form: every field except `id`, which is the document key.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        doc.remove("id");
        doc
    }

    pub fn without_descriptor(mut self) -> Self {
        self.descriptor = None;
        self
    }
}

fn take_string(doc: &mut Map<String, Value>, key: &str) -> Option<String> {
    match doc.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => {
            doc.insert(key.to_string(), other);
            None
        }
    }
}

fn parse_descriptor(v: &Value) -> Option<Descriptor> {
    let arr = v.as_array()?;
    if arr.is_empty() {
        return None;
    }
    arr.iter().map(Value::as_f64).collect()
}
