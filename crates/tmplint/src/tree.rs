//! layered data sources and the merged [ValueTree]
//!
//! [Layers] tracks
//! - the kind of each layer (which decides precedence)
//! - the source of each layer (path, or a description for in-memory layers)
//! - the converted [Value]
//!
//! Layers are merged lowest precedence first. `Map x Map` merges recursively, any other
//! pairing is replaced by the later layer. Lists are never concatenated.
use crate::templates::DefineTable;
use crate::value::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Precedence rank of a layer, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// `values.yaml` discovered next to the templates
    Defaults,
    /// the explicitly given data file
    Primary,
    Overlay,
    /// `key=value` pairs
    Overrides,
    /// output of a named sub-template rendered against all other layers
    Computed,
}

#[derive(Debug)]
pub struct Layer {
    pub kind: LayerKind,
    pub source: String,
    pub value: Value,
}

#[derive(Default, Debug)]
pub struct Layers {
    layers: Vec<Layer>,
}

impl Layers {
    /// Inserts a layer. The root value must be an object.
    pub fn insert(
        &mut self,
        kind: LayerKind,
        value: Value,
        source: impl Into<String>,
    ) -> Result<(), LoadError> {
        let source = source.into();
        let value = match value {
            Value::Null => Value::default(),
            value @ Value::Object(_) => value,
            other => {
                return Err(LoadError::NotAMap {
                    layer: source,
                    found: other.type_name(),
                })
            }
        };

        self.layers.push(Layer {
            kind,
            source,
            value,
        });
        Ok(())
    }

    pub fn insert_str(
        &mut self,
        kind: LayerKind,
        text: &str,
        source: impl Into<String>,
    ) -> Result<(), LoadError> {
        let source = source.into();
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|error| LoadError::Parse {
                layer: source.clone(),
                error,
            })?;
        self.insert(kind, yaml.into(), source)
    }

    pub fn load_file(&mut self, kind: LayerKind, file_path: &Path) -> Result<(), LoadError> {
        tracing::info!(path=%file_path.display(), ?kind, "loading values file");

        let text = std::fs::read_to_string(file_path).map_err(|error| LoadError::Io {
            path: file_path.to_owned(),
            error,
        })?;
        self.insert_str(kind, &text, file_path.display().to_string())
    }

    /// Loads `values.yaml` (or `values.yml`) from `dir` if there is one
    ///
    /// Returns the path of the loaded file
    pub fn discover_defaults(&mut self, dir: &Path) -> Result<Option<PathBuf>, LoadError> {
        for name in DEFAULT_VALUES_FILES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                self.load_file(LayerKind::Defaults, &candidate)?;
                return Ok(Some(candidate));
            }
        }

        tracing::debug!(dir=%dir.display(), "no default values file");
        Ok(None)
    }

    /// Collects all overrides into a single layer
    pub fn insert_overrides(&mut self, overrides: &[Override]) {
        if overrides.is_empty() {
            return;
        }

        let mut value = Value::default();
        for o in overrides {
            o.apply(&mut value);
        }

        self.layers.push(Layer {
            kind: LayerKind::Overrides,
            source: "overrides".to_string(),
            value,
        });
    }

    /// Merge all layers into one tree
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn resolve(&self) -> ValueTree {
        let mut ordered: Vec<&Layer> = self.layers.iter().collect();
        // stable: insertion order is kept within one kind
        ordered.sort_by_key(|layer| layer.kind);

        let mut tree = ValueTree::default();
        for layer in ordered {
            tracing::debug!(source = %layer.source, kind = ?layer.kind, "merging layer");
            tree.merge(&layer.value, &layer.source);
        }
        tree
    }

    /// Merge all layers, then render the sub-template `name` against the result and merge its
    /// output on top
    pub fn resolve_with_computed(
        &self,
        defines: &DefineTable,
        name: &str,
    ) -> Result<ValueTree, ResolveError> {
        let mut tree = self.resolve();

        let rendered = crate::render::Renderer::new(defines)
            .render_define(name, tree.root())
            .map_err(|error| ResolveError::Render {
                name: name.to_string(),
                error,
            })?;
        tracing::trace!(%rendered, "computed layer output");

        let source = format!("computed:{name}");
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&rendered).map_err(|error| ResolveError::Parse {
                name: name.to_string(),
                error,
            })?;
        let value = match Value::from(yaml) {
            Value::Null => Value::default(),
            value @ Value::Object(_) => value,
            other => {
                return Err(ResolveError::NotAMap {
                    name: name.to_string(),
                    found: other.type_name(),
                })
            }
        };

        tree.merge(&value, &source);
        Ok(tree)
    }
}

pub(crate) const DEFAULT_VALUES_FILES: [&str; 2] = ["values.yaml", "values.yml"];

/// The merged, read-only data set
#[derive(Debug, Default, serde::Serialize)]
pub struct ValueTree {
    root: Value,
    /// canonical leaf path -> source of the layer that set it
    origins: BTreeMap<String, String>,
}

impl ValueTree {
    pub fn new(root: Value) -> Self {
        let mut tree = Self::default();
        tree.merge(&root, "inline");
        tree
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Does the canonical path exist? The empty path is the root and always exists.
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.root);
        }
        self.root.lookup(path.split('.'))
    }

    /// Layer that last set the value at `path` (or one of its parents)
    pub fn origin(&self, path: &str) -> Option<&str> {
        let mut current = path;
        loop {
            if let Some(source) = self.origins.get(current) {
                return Some(source);
            }
            current = &current[..current.rfind('.')?];
        }
    }

    /// All canonical paths of the tree, depth first
    pub fn paths(&self) -> Vec<String> {
        fn collect(value: &Value, prefix: &str, out: &mut Vec<String>) {
            let Value::Object(object) = value else {
                return;
            };
            for (key, child) in object {
                let path = join(prefix, key);
                collect(child, &path, out);
                out.push(path);
            }
        }

        let mut out = vec![];
        collect(&self.root, "", &mut out);
        out
    }

    fn merge(&mut self, value: &Value, source: &str) {
        let mut root = std::mem::take(&mut self.root);
        merge_value(&mut root, value, "", source, &mut self.origins);
        self.root = root;
    }
}

fn merge_value(
    target: &mut Value,
    incoming: &Value,
    path: &str,
    source: &str,
    origins: &mut BTreeMap<String, String>,
) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let child_path = join(path, key);
                match existing.get_mut(key) {
                    Some(current) => merge_value(current, value, &child_path, source, origins),
                    None => {
                        existing.insert(key.clone(), value.clone());
                        record_origin(origins, &child_path, source);
                    }
                }
            }
        }
        (target, incoming) => {
            *target = incoming.clone();
            record_origin(origins, path, source);
        }
    }
}

fn record_origin(origins: &mut BTreeMap<String, String>, path: &str, source: &str) {
    // descendants of `path` sort directly after `path.`
    let prefix = format!("{path}.");
    let replaced: Vec<String> = origins
        .range(prefix.clone()..)
        .map(|(existing, _)| existing)
        .take_while(|existing| existing.starts_with(&prefix))
        .cloned()
        .collect();
    for existing in replaced {
        origins.remove(&existing);
    }
    origins.insert(path.to_string(), source.to_string());
}

pub(crate) fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// A single `dotted.path=value` override
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub path: Vec<String>,
    pub value: Value,
}

impl Override {
    /// Parse `a.b=c`. A `\.` keeps a literal dot inside a key.
    pub fn parse(raw: &str) -> Result<Self, OverrideError> {
        let Some((key, value)) = raw.split_once('=') else {
            return Err(OverrideError::MissingEquals(raw.to_string()));
        };

        let mut path = vec![];
        let mut current = String::new();
        let mut chars = key.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'.') => {
                    current.push('.');
                    chars.next();
                }
                '.' => path.push(std::mem::take(&mut current)),
                c => current.push(c),
            }
        }
        path.push(current);

        if path.iter().any(|segment| segment.trim().is_empty()) {
            return Err(OverrideError::EmptyKey(raw.to_string()));
        }

        Ok(Self {
            path,
            value: Value::infer(value),
        })
    }

    /// Parse `a=1,b.c=2`
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, OverrideError> {
        raw.split(',')
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Set the value, creating (or replacing non-object) intermediate values along the path
    pub fn apply(&self, target: &mut Value) {
        let mut current = target;
        for step in &self.path {
            if !matches!(current, Value::Object(_)) {
                *current = Value::default();
            }
            let Value::Object(object) = current else {
                unreachable!("replaced with an object above");
            };
            current = object.entry(step.clone()).or_insert(Value::Null);
        }
        *current = self.value.clone();
    }
}

impl std::str::FromStr for Override {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("Unable to parse values from {layer}")]
    Parse {
        layer: String,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("Values in {layer} must be a map, found {found}")]
    NotAMap { layer: String, found: &'static str },
    #[error("No template files found in {}", path.display())]
    NoFilesFound { path: PathBuf },
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum OverrideError {
    #[error("Override `{0}` is missing `=`")]
    MissingEquals(String),
    #[error("Override `{0}` has an empty key")]
    EmptyKey(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("Unable to render computed values from `{name}`")]
    Render {
        name: String,
        #[source]
        error: crate::render::RenderError,
    },
    #[error("Output of `{name}` is not valid yaml")]
    Parse {
        name: String,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("Output of `{name}` must be a map, found {found}")]
    NotAMap { name: String, found: &'static str },
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn layers(docs: &[(LayerKind, &str)]) -> Layers {
        let mut layers = Layers::default();
        for (idx, (kind, text)) in docs.iter().enumerate() {
            layers
                .insert_str(*kind, text, format!("layer{idx}"))
                .expect("valid yaml");
        }
        layers
    }

    #[test]
    fn maps_merge_recursively_and_lists_are_replaced() {
        let tree = layers(&[
            (LayerKind::Primary, "a: {x: 1, y: 2}\nlist: [1, 2]"),
            (LayerKind::Overlay, "a: {y: 3, z: 4}\nlist: [9]"),
        ])
        .resolve();

        let expected = Value::from(serde_json::json!({
            "a": {"x": 1, "y": 3, "z": 4},
            "list": [9],
        }));
        assert_eq!(tree.root(), &expected);
        assert_eq!(tree.origin("a.y"), Some("layer1"));
        assert_eq!(tree.origin("a.x"), Some("layer0"));
        assert_eq!(tree.origin("list"), Some("layer1"));
    }

    #[test]
    fn precedence_follows_kind_not_insertion() {
        let tree = layers(&[
            (LayerKind::Overlay, "name: overlay"),
            (LayerKind::Defaults, "name: default\nonly_default: true"),
        ])
        .resolve();

        assert_eq!(tree.get("name"), Some(&Value::from("overlay")));
        assert!(tree.exists("only_default"));
    }

    #[test]
    fn scalar_replaces_map() {
        let tree = layers(&[
            (LayerKind::Primary, "a: {b: {c: 1}}"),
            (LayerKind::Overlay, "a: {b: gone}"),
        ])
        .resolve();

        assert!(!tree.exists("a.b.c"));
        assert_eq!(tree.get("a.b"), Some(&Value::from("gone")));
        assert_eq!(tree.origin("a.b.c"), Some("layer1"));
    }

    #[test]
    fn replacing_a_map_keeps_sibling_origins() {
        let tree = layers(&[
            (LayerKind::Primary, "a: {b: {c: 1}}"),
            (LayerKind::Overlay, "a: {b: {d: 2}, bc: 3, b-x: 4}"),
            (LayerKind::Overlay, "a: {b: gone}"),
        ])
        .resolve();

        assert_eq!(tree.origin("a.b.c"), Some("layer2"));
        assert_eq!(tree.origin("a.b.d"), Some("layer2"));
        assert_eq!(tree.origin("a.bc"), Some("layer1"));
        assert_eq!(tree.origin("a.b-x"), Some("layer1"));
        assert_eq!(tree.origin("a"), Some("layer0"));
    }

    #[test]
    fn overrides_equal_file_layer() {
        let from_file = layers(&[
            (LayerKind::Primary, "service: {name: web, replicas: 1}"),
            (LayerKind::Overlay, "service: {replicas: 3, enabled: true}"),
        ])
        .resolve();

        let mut from_overrides = layers(&[(
            LayerKind::Primary,
            "service: {name: web, replicas: 1}",
        )]);
        from_overrides
            .insert_overrides(&Override::parse_list("service.replicas=3,service.enabled=true").unwrap());

        assert_eq!(from_file.root(), from_overrides.resolve().root());
    }

    #[test]
    fn override_parsing() {
        let o = Override::parse(r"a\.b.c=1.5").unwrap();
        assert_eq!(o.path, vec!["a.b".to_string(), "c".to_string()]);
        assert_eq!(o.value, Value::Decimal(1.5));

        assert_eq!(
            Override::parse("a..b=1"),
            Err(OverrideError::EmptyKey("a..b=1".to_string()))
        );
        assert_eq!(
            Override::parse("novalue"),
            Err(OverrideError::MissingEquals("novalue".to_string()))
        );
    }

    #[test]
    fn override_replaces_scalar_parent() {
        let mut value = Value::from(serde_json::json!({"a": 1}));
        Override::parse("a.b=x").unwrap().apply(&mut value);
        assert_eq!(value, Value::from(serde_json::json!({"a": {"b": "x"}})));
    }

    #[test]
    fn non_map_layer_is_rejected() {
        let mut layers = Layers::default();
        let err = layers
            .insert_str(LayerKind::Primary, "- 1\n- 2", "list.yaml")
            .expect_err("must be rejected");
        assert!(matches!(err, LoadError::NotAMap { found: "array", .. }));
    }

    #[test]
    fn deterministic() {
        let docs = [
            (LayerKind::Primary, "a: 1\nb: {c: 2}"),
            (LayerKind::Overlay, "b: {d: 3}"),
        ];
        assert_eq!(layers(&docs).resolve().root(), layers(&docs).resolve().root());
    }

    #[test]
    fn computed_layer_wins() {
        let templates = crate::templates! {
            "_computed.tpl" => r#"{{ define "computed" }}
fullname: {{ .name }}-{{ .env | default "dev" }}
replicas: {{ if eq .env "prod" }}3{{ else }}1{{ end }}
{{ end }}"#
        };
        let layers = layers(&[(LayerKind::Primary, "name: web
env: prod
replicas: 9")]);

        let tree = layers
            .resolve_with_computed(&templates.defines(), "computed")
            .unwrap();
        assert_eq!(tree.get("fullname"), Some(&Value::from("web-prod")));
        assert_eq!(tree.get("replicas"), Some(&Value::Integer(3)));
        assert_eq!(tree.origin("replicas"), Some("computed:computed"));
        assert_eq!(tree.origin("name"), Some("layer0"));

        assert!(matches!(
            layers.resolve_with_computed(&templates.defines(), "missing"),
            Err(ResolveError::Render { .. })
        ));
    }

    #[test]
    fn paths_lists_every_node() {
        let tree = ValueTree::new(Value::from(serde_json::json!({"a": {"b": 1}, "c": 2})));
        assert_eq!(tree.paths(), vec!["a.b", "a", "c"]);
    }
}
