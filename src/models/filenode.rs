use serde::{Deserialize, Serialize};

/// A node in a room's file tree, keyed by its `/`-separated path.
///
/// Serializes to the wire shape the editor clients consume:
/// `{"type": "file", "content": …, "extension": …}` or
/// `{"type": "folder", "isExpanded": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    File {
        content: String,
        extension: String,
    },
    Folder {
        #[serde(rename = "isExpanded")]
        is_expanded: bool,
    },
}

impl FileNode {
    pub fn file(path: &str, content: String) -> Self {
        FileNode::File {
            content,
            extension: extension_of(path),
        }
    }

    pub fn folder() -> Self {
        FileNode::Folder { is_expanded: true }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileNode::File { .. })
    }
}

/// Last component of a `/`-separated path.
pub fn leaf_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extension of the leaf name: the substring after the final `.`,
/// lower-cased. Empty when the leaf has no dot.
pub fn extension_of(path: &str) -> String {
    let leaf = leaf_of(path);
    match leaf.rfind('.') {
        Some(idx) if idx + 1 < leaf.len() => leaf[idx + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// Leaf name with its extension stripped, as used in run command lines.
pub fn basename_of(path: &str) -> &str {
    let leaf = leaf_of(path);
    match leaf.rfind('.') {
        Some(idx) if idx > 0 => &leaf[..idx],
        _ => leaf,
    }
}

/// Default content for a newly created file, by extension.
pub fn default_content_for(extension: &str) -> &'static str {
    match extension {
        "js" => "console.log('Hello, world!');\n",
        "jsx" => {
            "export default function App() {\n  return <div>Hello, world!</div>;\n}\n"
        }
        "ts" => "const greeting: string = 'Hello, world!';\nconsole.log(greeting);\n",
        "tsx" => {
            "export default function App(): JSX.Element {\n  return <div>Hello, world!</div>;\n}\n"
        }
        "py" => "print('Hello, world!')\n",
        "html" => {
            "<!DOCTYPE html>\n<html>\n<head>\n  <title>New Page</title>\n</head>\n<body>\n\n</body>\n</html>\n"
        }
        "css" => "body {\n  margin: 0;\n}\n",
        "json" => "{}\n",
        "md" => "# New Document\n",
        "txt" => "",
        _ => "// New file\n",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_from_leaf() {
        assert_eq!(extension_of("main.js"), "js");
        assert_eq!(extension_of("src/app/Main.TSX"), "tsx");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("trailing."), "");
    }

    #[test]
    fn basename_strips_extension() {
        assert_eq!(basename_of("src/main.cpp"), "main");
        assert_eq!(basename_of("main"), "main");
        assert_eq!(basename_of(".bashrc"), ".bashrc");
    }

    #[test]
    fn node_wire_shape() {
        let file = FileNode::file("a/b/main.js", "x=1\n".to_string());
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["extension"], "js");

        let folder = FileNode::folder();
        let json = serde_json::to_value(&folder).unwrap();
        assert_eq!(json["type"], "folder");
        assert_eq!(json["isExpanded"], true);
    }

    #[test]
    fn unknown_extension_gets_stub() {
        assert_eq!(default_content_for("zig"), "// New file\n");
        assert_eq!(default_content_for("py"), "print('Hello, world!')\n");
    }
}
