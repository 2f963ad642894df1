use crate::models::{basename_of, extension_of};

/// Build the shell command line that compiles and/or runs a file, by its
/// extension. Returns None for extensions with no known runner; the caller
/// reports that to the requesting user only.
pub fn command_for(path: &str) -> Option<String> {
    let base = basename_of(path);
    let cmd = match extension_of(path).as_str() {
        "js" => format!("node {path}"),
        "py" => format!("python {path}"),
        "java" => format!("javac {path} && java {base}"),
        "cpp" => format!("g++ {path} -o {base} && ./{base}"),
        "c" => format!("gcc {path} -o {base} && ./{base}"),
        "go" => format!("go run {path}"),
        "rs" => format!("rustc {path} && ./{base}"),
        "php" => format!("php {path}"),
        "rb" => format!("ruby {path}"),
        "sh" => format!("bash {path}"),
        "ps1" => format!("powershell {path}"),
        _ => return None,
    };
    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpreted_languages_run_directly() {
        assert_eq!(command_for("main.js").as_deref(), Some("node main.js"));
        assert_eq!(command_for("tool.py").as_deref(), Some("python tool.py"));
        assert_eq!(command_for("setup.sh").as_deref(), Some("bash setup.sh"));
    }

    #[test]
    fn compiled_languages_build_then_execute() {
        assert_eq!(
            command_for("main.cpp").as_deref(),
            Some("g++ main.cpp -o main && ./main")
        );
        assert_eq!(
            command_for("Main.java").as_deref(),
            Some("javac Main.java && java Main")
        );
        assert_eq!(
            command_for("tool.rs").as_deref(),
            Some("rustc tool.rs && ./tool")
        );
    }

    #[test]
    fn unknown_extensions_have_no_runner() {
        assert!(command_for("data.csv").is_none());
        assert!(command_for("Makefile").is_none());
    }
}
