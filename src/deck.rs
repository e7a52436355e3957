// Transport input decks that point at perturbed nuclear data
use crate::error::{Result, UqError};
use crate::reconstruct::PerturbedNuclide;
use std::fs;
use std::path::{Path, PathBuf};

/// Model input files copied verbatim (after renames) into every run directory.
pub const INPUT_FILES: [&str; 4] = ["materials.xml", "settings.xml", "tallies.xml", "geometry.xml"];

/// Mesh geometry files travel with the deck.
const MESH_EXTENSIONS: [&str; 2] = ["h5m", "e"];

/// Files whose nuclide references are rewritten.
const RENAMED_FILES: [&str; 2] = ["materials.xml", "tallies.xml"];

pub const LIBRARY_FILE: &str = "cross_sections_rand.xml";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every standalone occurrence of `from` with `to`.
///
/// An occurrence only counts when neither neighbour is alphanumeric or `_`,
/// so renaming `Fe56` leaves `Fe560` and `Fe56_rand` alone.
pub fn rename_nuclide(document: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return document.to_string();
    }
    let mut out = String::with_capacity(document.len());
    let mut rest = document;
    let mut prev: Option<char> = None;
    while let Some(pos) = rest.find(from) {
        let before = rest[..pos].chars().next_back().or(prev);
        let after = rest[pos + from.len()..].chars().next();
        let standalone = !before.map_or(false, is_name_char) && !after.map_or(false, is_name_char);

        out.push_str(&rest[..pos]);
        if standalone {
            out.push_str(to);
        } else {
            out.push_str(from);
        }
        prev = from.chars().next_back();
        rest = &rest[pos + from.len()..];
    }
    out.push_str(rest);
    out
}

/// One perturbed data file to register in the library index.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    /// Nuclide being replaced, e.g. `Fe56`.
    pub nuclide: String,
    /// Name the perturbed data is registered under, e.g. `Fe56_rand`.
    pub perturbed_name: String,
    pub path: PathBuf,
}

impl LibraryEntry {
    pub fn new(perturbed: &PerturbedNuclide, path: PathBuf) -> Self {
        LibraryEntry {
            nuclide: perturbed.nuclide.name(),
            perturbed_name: perturbed.name.clone(),
            path,
        }
    }

    fn to_xml(&self) -> String {
        format!(
            "  <library materials=\"{}\" path=\"{}\" type=\"neutron\"/>\n",
            self.perturbed_name,
            self.path.display()
        )
    }
}

/// Library index with `entries` appended before the closing tag.
pub fn register_libraries(cross_sections_xml: &str, entries: &[LibraryEntry]) -> Result<String> {
    let close = cross_sections_xml
        .rfind("</cross_sections>")
        .ok_or_else(|| UqError::Deck("library index has no </cross_sections> tag".to_string()))?;
    let mut out = String::with_capacity(cross_sections_xml.len() + 96 * entries.len());
    out.push_str(&cross_sections_xml[..close]);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    for entry in entries {
        let marker = format!("materials=\"{}\"", entry.perturbed_name);
        if out.contains(&marker) {
            log::warn!("{} already registered, skipping", entry.perturbed_name);
            continue;
        }
        out.push_str(&entry.to_xml());
    }
    out.push_str(&cross_sections_xml[close..]);
    Ok(out)
}

/// Point a materials document at `library`, replacing any existing
/// `<cross_sections>` element.
pub fn set_cross_sections_path(materials_xml: &str, library: &Path) -> Result<String> {
    let element = format!("<cross_sections>{}</cross_sections>", library.display());
    if let (Some(start), Some(end)) = (
        materials_xml.find("<cross_sections>"),
        materials_xml.find("</cross_sections>"),
    ) {
        if start < end {
            let end = end + "</cross_sections>".len();
            return Ok(format!("{}{}{}", &materials_xml[..start], element, &materials_xml[end..]));
        }
    }
    let open = materials_xml
        .find("<materials")
        .and_then(|start| materials_xml[start..].find('>').map(|off| start + off + 1))
        .ok_or_else(|| UqError::Deck("materials document has no <materials> element".to_string()))?;
    Ok(format!(
        "{}\n  {}{}",
        &materials_xml[..open],
        element,
        &materials_xml[open..]
    ))
}

/// Builds run directories from a template deck and a base library index.
#[derive(Debug, Clone)]
pub struct DeckWriter {
    pub template_dir: PathBuf,
    pub base_library: PathBuf,
}

impl DeckWriter {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(template_dir: P, base_library: Q) -> Self {
        DeckWriter {
            template_dir: template_dir.into(),
            base_library: base_library.into(),
        }
    }

    /// Populate `run_dir` with the template deck rewritten to use the
    /// perturbed nuclides and return the path of the new library index.
    pub fn write<P: AsRef<Path>>(&self, run_dir: P, perturbed: &[LibraryEntry]) -> Result<PathBuf> {
        let run_dir = run_dir.as_ref();
        fs::create_dir_all(run_dir)?;

        let library = run_dir.join(LIBRARY_FILE);
        let base = fs::read_to_string(&self.base_library).map_err(|e| {
            UqError::Deck(format!("{}: {}", self.base_library.display(), e))
        })?;
        fs::write(&library, register_libraries(&base, perturbed)?)?;

        for name in INPUT_FILES {
            let src = self.template_dir.join(name);
            let mut text = fs::read_to_string(&src)
                .map_err(|e| UqError::Deck(format!("{}: {}", src.display(), e)))?;
            if RENAMED_FILES.contains(&name) {
                for entry in perturbed {
                    text = rename_nuclide(&text, &entry.nuclide, &entry.perturbed_name);
                }
            }
            if name == "materials.xml" {
                text = set_cross_sections_path(&text, &library)?;
            }
            fs::write(run_dir.join(name), text)?;
        }

        for dir_entry in fs::read_dir(&self.template_dir)? {
            let path = dir_entry?.path();
            let is_mesh = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| MESH_EXTENSIONS.contains(&ext));
            if is_mesh && path.is_file() {
                if let Some(file_name) = path.file_name() {
                    fs::copy(&path, run_dir.join(file_name))?;
                }
            }
        }

        log::info!(
            "wrote deck with {} perturbed nuclides to {}",
            perturbed.len(),
            run_dir.display()
        );
        Ok(library)
    }
}
