//! collection of template files (path, source text and parse result)
//!
//! [Templates] parses every file once on insertion and assigns it a stable index. Findings,
//! [Definition]s and the analysis refer to files by that index.
use crate::template::{self, Define, Delimiters, Node, Parsed};
use crate::tree::{LoadError, DEFAULT_VALUES_FILES};
use crate::visit::VisitNodes;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct TemplateFile {
    pub path: PathBuf,
    pub text: String,
    pub parsed: Parsed,
}

#[derive(Default, Debug)]
pub struct Templates {
    delimiters: Delimiters,
    files: Vec<TemplateFile>,
}

impl Templates {
    pub fn new(delimiters: Delimiters) -> Self {
        Self {
            delimiters,
            files: vec![],
        }
    }

    /// Parses and inserts a template, returns its index
    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> usize {
        let path = path.into();
        let text = text.into();
        let parsed = template::parse(&text, &self.delimiters);
        tracing::debug!(path=%path.display(), errors = parsed.errors.len(), "parsed template");

        self.files.push(TemplateFile { path, text, parsed });
        self.files.len() - 1
    }

    pub fn load_file(&mut self, file_path: &Path) -> Result<usize, LoadError> {
        tracing::info!(path=%file_path.display(), "loading template");

        let text = std::fs::read_to_string(file_path).map_err(|error| LoadError::Io {
            path: file_path.to_owned(),
            error,
        })?;
        Ok(self.insert(file_path, text))
    }

    /// Load all template files of a directory in path order
    ///
    /// `values.yaml`/`values.yml` are data, not templates, and are skipped.
    pub fn load_directory(&mut self, dir_path: &Path, recursive: bool) -> Result<usize, LoadError> {
        let mut file_paths = vec![];
        collect_template_files(dir_path, recursive, &mut file_paths)?;
        file_paths.sort();

        if file_paths.is_empty() {
            return Err(LoadError::NoFilesFound {
                path: dir_path.to_owned(),
            });
        }

        for file_path in &file_paths {
            self.load_file(file_path)?;
        }
        Ok(file_paths.len())
    }

    pub fn files(&self) -> &[TemplateFile] {
        &self.files
    }

    pub fn get(&self, index: usize) -> &TemplateFile {
        &self.files[index]
    }

    /// Collect every `define` of every file into one table
    ///
    /// This is the first pass of cross-file resolution; includes are only resolved against the
    /// finished table. A later file wins when a name is defined twice.
    pub fn defines(&self) -> DefineTable {
        let mut table = DefineTable::default();
        for (file, template) in self.files.iter().enumerate() {
            template.parsed.root.visit_nodes(&mut |node: &Node| {
                if let Node::Define(define) = node {
                    table.insert(file, define.clone());
                }
            });
        }
        table
    }
}

pub const TEMPLATE_EXTENSIONS: [&str; 6] = ["tpl", "tmpl", "gotmpl", "yaml", "yml", "txt"];

fn collect_template_files(
    dir_path: &Path,
    recursive: bool,
    file_paths: &mut Vec<PathBuf>,
) -> Result<(), LoadError> {
    let io = |error| LoadError::Io {
        path: dir_path.to_owned(),
        error,
    };

    for dir_entry in std::fs::read_dir(dir_path).map_err(io)? {
        let dir_entry = dir_entry.map_err(io)?;
        let file_type = dir_entry.file_type().map_err(io)?;
        let file_path = dir_entry.path();

        if file_type.is_dir() {
            if recursive {
                collect_template_files(&file_path, recursive, file_paths)?;
            }
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let file_name = dir_entry.file_name().to_string_lossy().into_owned();
        if DEFAULT_VALUES_FILES.contains(&file_name.as_str()) {
            continue;
        }

        let is_template = file_path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| TEMPLATE_EXTENSIONS.contains(&extension));
        if is_template {
            file_paths.push(file_path);
        }
    }

    Ok(())
}

/// Macro to create [Templates] from in-memory sources
///
/// ```
/// # use tmplint::templates;
/// let templates = templates! {
///   "main.tpl" => "{{ .a }}",
///   "_helpers.tpl" => r#"{{ define "x" }}{{ end }}"#
/// };
/// assert_eq!(templates.files().len(), 2);
/// ```
#[macro_export]
macro_rules! templates {
    { $($path:expr => $text:expr),+ $(,)? } => {{
        let mut templates = $crate::templates::Templates::default();
        $(
            templates.insert($path, $text);
        )+
        templates
    }};
}

#[derive(Debug, Clone)]
pub struct Definition {
    /// index of the defining file in [Templates]
    pub file: usize,
    pub define: Define,
}

/// Named sub-templates of a load unit
#[derive(Debug, Default)]
pub struct DefineTable {
    by_name: indexmap::IndexMap<String, Definition>,
}

impl DefineTable {
    pub fn insert(&mut self, file: usize, define: Define) {
        if let Some(previous) = self.by_name.get(&define.name) {
            tracing::debug!(name = %define.name, previous = previous.file, file, "define replaced");
        }
        self.by_name
            .insert(define.name.clone(), Definition { file, define });
    }

    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
