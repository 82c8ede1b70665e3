use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Class index to human readable name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Falls back to the decimal index for classes the table does not cover.
    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parses the `names` entry exported into ONNX metadata, a Python dict
    /// literal like `{0: 'person', 1: 'helmet'}`.
    pub fn from_metadata(raw: &str) -> Option<Self> {
        let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
        let mut pairs = Vec::new();

        for entry in body.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (index, name) = entry.split_once(':')?;
            let index: usize = index.trim().parse().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            pairs.push((index, name.to_string()));
        }

        if pairs.is_empty() {
            return None;
        }

        pairs.sort_by_key(|(index, _)| *index);
        let len = pairs.last().map(|(index, _)| index + 1).unwrap_or(0);
        let mut names: Vec<String> = (0..len).map(|i| i.to_string()).collect();
        for (index, name) in pairs {
            names[index] = name;
        }

        Some(Self { names })
    }
}

/// One label per line; only the first comma separated field is kept so
/// `label,r,g,b` files load too.
pub fn load_labels(filepath: &Path) -> io::Result<ClassLabels> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut names = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.split(',').next().unwrap_or_default().trim();
        if label.is_empty() {
            continue;
        }
        names.push(label.to_string());
    }

    if names.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("No labels found in {:?}", filepath),
        ));
    }

    Ok(ClassLabels::new(names))
}
