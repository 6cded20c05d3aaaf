use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const EN: &str = include_str!("../locales/en.json");
const ES: &str = include_str!("../locales/es.json");

/// Textos visibles para el usuario, indexados por clave con puntos (`play.queueEnded`).
#[derive(Debug, Clone)]
pub struct Locale {
    name: String,
    strings: HashMap<String, String>,
}

impl Locale {
    pub const SUPPORTED: &'static [&'static str] = &["en", "es"];

    pub fn is_supported(name: &str) -> bool {
        Self::SUPPORTED.contains(&name)
    }

    pub fn load(name: &str) -> Result<Self> {
        let raw = match name {
            "en" => EN,
            "es" => ES,
            other => anyhow::bail!("Locale no soportado: {}", other),
        };

        let root: Value =
            serde_json::from_str(raw).with_context(|| format!("Locale '{}' mal formado", name))?;

        let mut strings = HashMap::new();
        flatten(&root, String::new(), &mut strings);
        debug!("🌐 Locale '{}' cargado con {} textos", name, strings.len());

        Ok(Self {
            name: name.to_string(),
            strings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Devuelve el texto de la clave, o la clave misma si no existe.
    pub fn t(&self, key: &str) -> String {
        match self.strings.get(key) {
            Some(text) => text.clone(),
            None => {
                warn!("🌐 Clave de traducción faltante: {}", key);
                key.to_string()
            }
        }
    }

    /// Como [`Locale::t`], sustituyendo los marcadores `{nombre}`.
    pub fn tf(&self, key: &str, args: &[(&str, &str)]) -> String {
        args.iter().fold(self.t(key), |text, (name, value)| {
            text.replace(&format!("{{{}}}", name), value)
        })
    }
}

fn flatten(value: &Value, prefix: String, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(child, path, out);
            }
        }
        Value::String(text) => {
            out.insert(prefix, text.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}
