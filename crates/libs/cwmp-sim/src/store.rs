//! Simulated device parameter tree.

use std::cell::OnceCell;
use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::error::SimulatorError;
use crate::value::{ParamValue, XSD_STRING};

/// The two alternative data-model roots, in lookup order.
pub const ROOT_OBJECTS: [&str; 2] = ["Device.", "InternetGatewayDevice."];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterRecord {
    pub writable: bool,
    /// `None` for object-instance markers (paths ending in `.`).
    pub value: Option<ParamValue>,
}

impl ParameterRecord {
    pub fn new(writable: bool, value: ParamValue) -> Self {
        Self { writable, value: Some(value) }
    }

    pub fn object(writable: bool) -> Self {
        Self { writable, value: None }
    }

    pub fn type_tag(&self) -> Option<&str> {
        self.value.as_ref().map(ParamValue::type_tag)
    }
}

/// Path-keyed parameter records plus a lazily built sorted index of the paths.
#[derive(Debug, Default)]
pub struct ParameterStore {
    records: HashMap<String, ParameterRecord>,
    sorted: OnceCell<Vec<String>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a tree from a JSON object of `path -> [writable, value, type]`.
    /// Object markers may be given as `[writable]`.
    pub fn from_json(input: &str) -> Result<Self, SimulatorError> {
        let root: JsonValue =
            serde_json::from_str(input).map_err(|err| SimulatorError::DataModel(err.to_string()))?;
        let JsonValue::Object(entries) = root else {
            return Err(SimulatorError::DataModel("top level must be an object".into()));
        };
        let mut store = Self::new();
        for (path, entry) in entries {
            let record = parse_record(&path, &entry).map_err(SimulatorError::DataModel)?;
            store.records.insert(path, record);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ParameterRecord> {
        self.records.get(path)
    }

    pub fn has(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    pub fn set(&mut self, path: impl Into<String>, record: ParameterRecord) {
        if self.records.insert(path.into(), record).is_none() {
            self.invalidate();
        }
    }

    /// Replaces the value of an existing parameter, keeping its writable flag.
    /// Returns `false` when the path is unknown.
    pub fn set_value(&mut self, path: &str, value: ParamValue) -> bool {
        match self.records.get_mut(path) {
            Some(record) => {
                record.value = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn value(&self, path: &str) -> Option<&ParamValue> {
        self.records.get(path).and_then(|record| record.value.as_ref())
    }

    /// Full path of `suffix` under the first root object that has it, checking
    /// `Device.` before `InternetGatewayDevice.`.
    pub fn resolve_root(&self, suffix: &str) -> Option<String> {
        ROOT_OBJECTS
            .iter()
            .map(|root| format!("{root}{suffix}"))
            .find(|path| self.records.contains_key(path))
    }

    pub fn root_value(&self, suffix: &str) -> Option<&ParamValue> {
        self.resolve_root(suffix).and_then(|path| self.value(&path))
    }

    /// Removes every path starting with `prefix`, returning how many went.
    pub fn delete_prefix(&mut self, prefix: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|path, _| !path.starts_with(prefix));
        let removed = before - self.records.len();
        if removed > 0 {
            self.invalidate();
        }
        removed
    }

    pub fn sorted_paths(&self) -> &[String] {
        self.sorted.get_or_init(|| {
            let mut paths: Vec<String> = self.records.keys().cloned().collect();
            paths.sort();
            paths
        })
    }

    /// Paths under `prefix`. With `next_level_only` only the immediate children
    /// are returned: leaves and direct sub-object markers, never grandchildren.
    pub fn children_at(&self, prefix: &str, next_level_only: bool) -> Vec<&str> {
        self.sorted_paths()
            .iter()
            .map(String::as_str)
            .filter(|path| path.starts_with(prefix))
            .filter(|path| !next_level_only || is_next_level(path, prefix))
            .collect()
    }

    /// Creates the lowest free instance `objectName{n}.` and fills it with the
    /// parameters of the lowest-numbered existing sibling, reset to their type
    /// defaults. Returns `n`.
    pub fn add_object_instance(&mut self, object_name: &str) -> u32 {
        let mut instance = 1;
        while self.records.contains_key(&format!("{object_name}{instance}.")) {
            instance += 1;
        }
        let template = self.lowest_instance(object_name);

        let new_prefix = format!("{object_name}{instance}.");
        self.records.insert(new_prefix.clone(), ParameterRecord::object(true));

        if let Some(template) = template {
            let template_prefix = format!("{object_name}{template}.");
            let copies: Vec<(String, ParameterRecord)> = self
                .records
                .iter()
                .filter_map(|(path, record)| {
                    let suffix = path.strip_prefix(template_prefix.as_str())?;
                    if suffix.is_empty() {
                        return None;
                    }
                    let value = record
                        .value
                        .as_ref()
                        .map(|value| ParamValue::default_for(value.type_tag()));
                    Some((
                        format!("{new_prefix}{suffix}"),
                        ParameterRecord { writable: record.writable, value },
                    ))
                })
                .collect();
            for (path, record) in copies {
                self.records.entry(path).or_insert(record);
            }
        }

        self.invalidate();
        instance
    }

    /// Removes the whole subtree rooted at `object_name`.
    pub fn delete_object_instance(&mut self, object_name: &str) -> usize {
        self.delete_prefix(object_name)
    }

    fn lowest_instance(&self, object_name: &str) -> Option<u32> {
        self.records
            .keys()
            .filter_map(|path| {
                let rest = path.strip_prefix(object_name)?;
                let (number, _) = rest.split_once('.')?;
                number.parse::<u32>().ok()
            })
            .min()
    }

    fn invalidate(&mut self) {
        self.sorted.take();
    }
}

fn is_next_level(path: &str, prefix: &str) -> bool {
    if path.len() <= prefix.len() + 1 {
        return false;
    }
    let Some(rest) = path.get(prefix.len() + 1..) else {
        return false;
    };
    match rest.find('.') {
        None => true,
        Some(offset) => offset == rest.len() - 1,
    }
}

fn parse_record(path: &str, entry: &JsonValue) -> Result<ParameterRecord, String> {
    let items = entry.as_array().ok_or_else(|| format!("{path}: entry must be an array"))?;
    let writable = items
        .first()
        .and_then(JsonValue::as_bool)
        .ok_or_else(|| format!("{path}: first element must be the writable flag"))?;
    let text = match items.get(1) {
        None | Some(JsonValue::Null) => {
            if path.ends_with('.') {
                return Ok(ParameterRecord::object(writable));
            }
            String::new()
        }
        Some(JsonValue::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    let type_tag = items.get(2).and_then(JsonValue::as_str).unwrap_or(XSD_STRING);
    Ok(ParameterRecord::new(writable, ParamValue::from_wire(type_tag, &text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{XSD_BOOLEAN, XSD_DATE_TIME, XSD_UNSIGNED_INT};

    fn sample_store() -> ParameterStore {
        ParameterStore::from_json(
            r#"{
                "Device.": [false],
                "Device.DeviceInfo.": [false],
                "Device.DeviceInfo.Manufacturer": [false, "Acme", "xsd:string"],
                "Device.WANDevice.": [false],
                "Device.WANDevice.1.": [false],
                "Device.WANDevice.1.Enable": [true, "true", "xsd:boolean"],
                "Device.WANDevice.1.WANConnectionDevice.": [false],
                "Device.WANDevice.1.WANConnectionDevice.1.": [false],
                "Device.WANDevice.1.WANConnectionDevice.1.Name": [true, "wan", "xsd:string"]
            }"#,
        )
        .expect("sample data model")
    }

    #[test]
    fn full_listing_returns_every_path_once() {
        let store = sample_store();
        let names = store.children_at("", false);
        assert_eq!(names.len(), store.len());
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(deduped, names);
    }

    #[test]
    fn next_level_listing_stops_at_immediate_children() {
        let store = sample_store();
        let names = store.children_at("Device.WANDevice.1.", true);
        assert_eq!(
            names,
            vec!["Device.WANDevice.1.Enable", "Device.WANDevice.1.WANConnectionDevice."]
        );
    }

    #[test]
    fn add_object_numbers_instances_from_one() {
        let mut store = ParameterStore::new();
        store.set("Device.Foo.", ParameterRecord::object(true));
        assert_eq!(store.add_object_instance("Device.Foo."), 1);
        assert_eq!(store.add_object_instance("Device.Foo."), 2);
        assert!(store.has("Device.Foo.1."));
        assert!(store.has("Device.Foo.2."));
    }

    #[test]
    fn add_object_copies_lowest_sibling_with_type_defaults() {
        let mut store = ParameterStore::new();
        store.set("Device.Host.", ParameterRecord::object(false));
        store.set("Device.Host.2.", ParameterRecord::object(true));
        store.set("Device.Host.2.Active", ParameterRecord::new(false, ParamValue::Boolean(true)));
        store.set("Device.Host.2.Seen", ParameterRecord::new(true, ParamValue::UnsignedInt(9)));
        store.set("Device.Host.3.", ParameterRecord::object(true));
        store.set("Device.Host.3.OnlyHere", ParameterRecord::new(true, ParamValue::Int(1)));
        store.set(
            "Device.Host.2.LastChange",
            ParameterRecord::new(
                false,
                ParamValue::from_wire(XSD_DATE_TIME, "2024-05-01T10:00:00Z"),
            ),
        );

        let instance = store.add_object_instance("Device.Host.");
        assert_eq!(instance, 1);

        let active = store.get("Device.Host.1.Active").expect("copied");
        assert!(!active.writable);
        assert_eq!(active.type_tag(), Some(XSD_BOOLEAN));
        assert_eq!(store.value("Device.Host.1.Seen").map(ParamValue::to_wire), Some("0".into()));
        assert_eq!(
            store.value("Device.Host.1.Seen").map(ParamValue::type_tag),
            Some(XSD_UNSIGNED_INT)
        );
        assert_eq!(
            store.value("Device.Host.1.LastChange").map(ParamValue::to_wire),
            Some(crate::clock::ZERO_DATE.to_string())
        );
        assert!(!store.has("Device.Host.1.OnlyHere"));
    }

    #[test]
    fn structural_changes_refresh_sorted_paths() {
        let mut store = sample_store();
        let before = store.sorted_paths().len();
        store.add_object_instance("Device.WANDevice.");
        assert!(store.sorted_paths().iter().any(|path| path == "Device.WANDevice.2.Enable"));
        assert!(store.sorted_paths().len() > before);

        store.delete_object_instance("Device.WANDevice.2.");
        assert_eq!(store.sorted_paths().len(), before);
    }

    #[test]
    fn delete_object_removes_only_that_subtree() {
        let mut store = ParameterStore::new();
        let paths =
            ["Device.Foo.1.", "Device.Foo.1.A", "Device.Foo.10.", "Device.Foo.10.A", "Device.Bar"];
        for path in paths {
            store.set(path, ParameterRecord::new(true, ParamValue::String(String::new())));
        }
        assert_eq!(store.delete_object_instance("Device.Foo.1."), 2);
        assert_eq!(
            store.children_at("", false),
            vec!["Device.Bar", "Device.Foo.10.", "Device.Foo.10.A"]
        );
    }

    #[test]
    fn data_model_rejects_non_array_entries() {
        let err = ParameterStore::from_json(r#"{"Device.X": "oops"}"#).expect_err("invalid");
        assert!(err.to_string().contains("Device.X"));
    }
}
