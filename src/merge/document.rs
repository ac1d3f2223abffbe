// src/merge/document.rs
//! Flattening structured documents into key-path maps and back

use std::collections::BTreeMap;

/// Leaf values keyed by their path of table/object keys
pub type Flat<V> = BTreeMap<Vec<String>, V>;

/// A parsed config document that can be flattened for merging
///
/// Arrays are leaves: merging never looks inside them. Empty tables are
/// leaves too, so `[section]` with no keys survives a round trip.
pub trait Document: Sized + Clone {
    fn parse_text(text: &str) -> Result<Self, String>;
    fn render(&self) -> Result<String, String>;
    fn flatten(&self) -> Flat<Self>;
    fn unflatten(flat: Flat<Self>) -> Self;
    fn is_empty_table(&self) -> bool;
}

impl Document for toml::Value {
    fn parse_text(text: &str) -> Result<Self, String> {
        text.parse::<toml::Table>()
            .map(toml::Value::Table)
            .map_err(|e| e.to_string())
    }

    fn render(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    fn flatten(&self) -> Flat<Self> {
        let mut flat = Flat::new();
        if let toml::Value::Table(table) = self {
            for (key, value) in table {
                flatten_toml(vec![key.clone()], value, &mut flat);
            }
        }
        flat
    }

    fn unflatten(flat: Flat<Self>) -> Self {
        let mut root = toml::Table::new();
        for (path, value) in flat {
            insert_toml(&mut root, &path, value);
        }
        toml::Value::Table(root)
    }

    fn is_empty_table(&self) -> bool {
        matches!(self, toml::Value::Table(t) if t.is_empty())
    }
}

fn flatten_toml(path: Vec<String>, value: &toml::Value, flat: &mut Flat<toml::Value>) {
    match value {
        toml::Value::Table(table) if !table.is_empty() => {
            for (key, child) in table {
                let mut child_path = path.clone();
                child_path.push(key.clone());
                flatten_toml(child_path, child, flat);
            }
        }
        leaf => {
            flat.insert(path, leaf.clone());
        }
    }
}

fn insert_toml(table: &mut toml::Table, path: &[String], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = table;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert(toml::Value::Table(toml::Table::new()));
        match entry {
            toml::Value::Table(next) => current = next,
            // Structural clashes are resolved before unflattening
            _ => return,
        }
    }
    // An empty leaf never wipes a populated table
    let keep = matches!(current.get(last), Some(toml::Value::Table(t)) if !t.is_empty()) && value.is_empty_table();
    if !keep {
        current.insert(last.clone(), value);
    }
}

impl Document for serde_json::Value {
    fn parse_text(text: &str) -> Result<Self, String> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        if !value.is_object() {
            return Err("top-level value is not an object".to_string());
        }
        Ok(value)
    }

    fn render(&self) -> Result<String, String> {
        let mut text = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        text.push('\n');
        Ok(text)
    }

    fn flatten(&self) -> Flat<Self> {
        let mut flat = Flat::new();
        if let serde_json::Value::Object(map) = self {
            for (key, value) in map {
                flatten_json(vec![key.clone()], value, &mut flat);
            }
        }
        flat
    }

    fn unflatten(flat: Flat<Self>) -> Self {
        let mut root = serde_json::Map::new();
        for (path, value) in flat {
            insert_json(&mut root, &path, value);
        }
        serde_json::Value::Object(root)
    }

    fn is_empty_table(&self) -> bool {
        matches!(self, serde_json::Value::Object(m) if m.is_empty())
    }
}

fn flatten_json(path: Vec<String>, value: &serde_json::Value, flat: &mut Flat<serde_json::Value>) {
    match value {
        serde_json::Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let mut child_path = path.clone();
                child_path.push(key.clone());
                flatten_json(child_path, child, flat);
            }
        }
        leaf => {
            flat.insert(path, leaf.clone());
        }
    }
}

fn insert_json(map: &mut serde_json::Map<String, serde_json::Value>, path: &[String], value: serde_json::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert(serde_json::Value::Object(serde_json::Map::new()));
        match entry {
            serde_json::Value::Object(next) => current = next,
            _ => return,
        }
    }
    let keep = matches!(current.get(last), Some(serde_json::Value::Object(m)) if !m.is_empty()) && value.is_empty_table();
    if !keep {
        current.insert(last.clone(), value);
    }
}
