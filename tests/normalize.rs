use notes_rag::config::NormalizeConfig;
use notes_rag::normalize::{load_normalized, normalize, NormalizationError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Minimal valid PDF whose text layer reads "quarterly garden plan".
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 53 >> stream\nBT /F1 12 Tf 100 700 Td (quarterly garden plan) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_vault() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("all");
    let dest = tmp.path().join("all-txt");

    fs::create_dir_all(src.join("projects/rust")).unwrap();
    fs::create_dir_all(src.join("papers")).unwrap();
    fs::create_dir_all(src.join(".obsidian")).unwrap();
    fs::write(
        src.join("projects/rust/ownership.md"),
        "# Ownership\n\nEvery value has a single owner.\n",
    )
    .unwrap();
    fs::write(src.join("inbox.md"), "- call the plumber\n- café ☕ with Ana\n").unwrap();
    fs::write(src.join("plain.txt"), "Just a text file.\n").unwrap();
    fs::write(src.join("papers/garden.pdf"), minimal_pdf()).unwrap();
    fs::write(src.join(".obsidian/app.md"), "{}").unwrap();
    fs::write(src.join("image.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

    (tmp, src, dest)
}

fn read_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[test]
fn converts_markdown_pdf_and_text() {
    let (_tmp, src, dest) = setup_vault();
    let report = normalize(&src, &dest, &NormalizeConfig::default()).unwrap();

    assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
    assert_eq!(report.files_converted, 4);
    assert_eq!(report.markdown, 2);
    assert_eq!(report.pdf, 1);
    assert_eq!(report.text, 1);

    assert_eq!(
        fs::read_to_string(dest.join("projects/rust/ownership.txt")).unwrap(),
        "# Ownership\n\nEvery value has a single owner.\n"
    );
    assert_eq!(
        fs::read_to_string(dest.join("inbox.txt")).unwrap(),
        "- call the plumber\n- café ☕ with Ana\n"
    );
    let pdf_text = fs::read_to_string(dest.join("papers/garden.txt")).unwrap();
    assert!(pdf_text.contains("quarterly garden plan"), "got: {:?}", pdf_text);

    assert!(!dest.join(".obsidian").exists());
    assert!(!dest.join("image.txt").exists());
}

#[test]
fn normalizing_twice_is_byte_identical() {
    let (_tmp, src, dest) = setup_vault();
    normalize(&src, &dest, &NormalizeConfig::default()).unwrap();
    let first = read_tree(&dest);

    let report = normalize(&src, &dest, &NormalizeConfig::default()).unwrap();
    assert_eq!(report.files_converted, 4);
    let second = read_tree(&dest);

    assert_eq!(first, second);
}

#[test]
fn changed_sources_overwrite_outputs() {
    let (_tmp, src, dest) = setup_vault();
    normalize(&src, &dest, &NormalizeConfig::default()).unwrap();

    fs::write(src.join("plain.txt"), "Updated.\n").unwrap();
    normalize(&src, &dest, &NormalizeConfig::default()).unwrap();
    assert_eq!(fs::read_to_string(dest.join("plain.txt")).unwrap(), "Updated.\n");
}

#[test]
fn broken_files_do_not_stop_the_run() {
    let (_tmp, src, dest) = setup_vault();
    fs::write(src.join("papers/broken.pdf"), b"not a valid pdf").unwrap();
    fs::write(src.join("latin1.md"), [0x63u8, 0x61, 0x66, 0xe9]).unwrap();

    let report = normalize(&src, &dest, &NormalizeConfig::default()).unwrap();
    assert_eq!(report.files_converted, 4);
    assert_eq!(report.failures.len(), 2);

    let mut failed: Vec<&str> = report.failures.iter().map(|f| f.path()).collect();
    failed.sort();
    assert_eq!(failed, vec!["latin1.md", "papers/broken.pdf"]);
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f, NormalizationError::Pdf { .. })));
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f, NormalizationError::Utf8 { .. })));

    assert!(dest.join("papers/garden.txt").exists());
    assert!(!dest.join("papers/broken.txt").exists());
}

#[test]
fn configured_globs_narrow_the_scan() {
    let (_tmp, src, dest) = setup_vault();
    let config = NormalizeConfig {
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: vec!["projects/**".to_string()],
        follow_symlinks: false,
    };
    let report = normalize(&src, &dest, &config).unwrap();
    assert_eq!(report.files_converted, 1);
    assert!(dest.join("inbox.txt").exists());
}

#[test]
fn missing_source_dir_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let result = normalize(
        &tmp.path().join("nope"),
        &tmp.path().join("out"),
        &NormalizeConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn load_normalized_is_sorted_and_relative() {
    let (_tmp, src, dest) = setup_vault();
    normalize(&src, &dest, &NormalizeConfig::default()).unwrap();

    let docs = load_normalized(&dest).unwrap();
    let paths: Vec<&str> = docs.iter().map(|d| d.relative_path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "inbox.txt",
            "papers/garden.txt",
            "plain.txt",
            "projects/rust/ownership.txt"
        ]
    );
    assert!(docs[3].text.contains("single owner"));
}

#[test]
fn load_normalized_requires_the_directory() {
    let tmp = TempDir::new().unwrap();
    let err = load_normalized(&tmp.path().join("all-txt")).unwrap_err();
    assert!(err.to_string().contains("rag normalize"));
}
