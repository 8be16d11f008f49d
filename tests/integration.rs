use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn shx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("shx");
    path
}

const SERVERS_CSV: &str = "\
Server Name,Environment,Port,Active,Installed
SVR01,Production,8080,true,2023-01-15
SVR02,Staging,443,false,2023-02-01
SVR03,Production,443,true,
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let sheets_dir = root.join("sheets");
    fs::create_dir_all(&sheets_dir).unwrap();
    fs::write(sheets_dir.join("servers.csv"), SERVERS_CSV).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/shx.sqlite"

[ingest]
index = "rows"

[retrieval]
final_limit = 20

[connectors.sheets]
root = "{root}/sheets"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("shx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_shx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn init_and_import(config_path: &Path) {
    let (stdout, stderr, ok) = run_shx(config_path, &["init"]);
    assert!(ok, "init failed: stdout={}, stderr={}", stdout, stderr);
    let (stdout, stderr, ok) = run_shx(config_path, &["import", "--progress", "off"]);
    assert!(ok, "import failed: stdout={}, stderr={}", stdout, stderr);
}

fn write_xlsx(path: &Path) {
    let parts = [
        (
            "xl/workbook.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Racks" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#,
        ),
        (
            "xl/sharedStrings.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<si><t>Rack</t></si><si><t>Units</t></si><si><t>R-A1</t></si><si><t>R-B2</t></si>
</sst>"#,
        ),
        (
            "xl/worksheets/sheet1.xml",
            r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>42</v></c></row>
<row r="3"><c r="A3" t="s"><v>3</v></c><c r="B3"><v>12</v></c></row>
</sheetData></worksheet>"#,
        ),
    ];

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in parts {
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, ok) = run_shx(&config_path, &["init"]);
    assert!(ok, "first init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, ok) = run_shx(&config_path, &["init"]);
    assert!(ok, "second init failed (not idempotent)");
}

#[test]
fn test_import_requires_init() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, ok) = run_shx(&config_path, &["import", "--progress", "off"]);
    assert!(!ok);
    assert!(stderr.contains("shx init"), "stderr={}", stderr);
}

#[test]
fn test_import_csv() {
    let (_tmp, config_path) = setup_test_env();

    run_shx(&config_path, &["init"]);
    let (stdout, stderr, ok) = run_shx(&config_path, &["import", "--progress", "off"]);
    assert!(ok, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files: 1"));
    assert!(stdout.contains("tables imported: 1"));
    assert!(stdout.contains("rows written: 3"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_import_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    run_shx(&config_path, &["init"]);
    let (stdout, stderr, ok) = run_shx(&config_path, &["import", "--dry-run", "--progress", "off"]);
    assert!(ok, "dry-run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("table servers (servers.csv): 3 rows"));
    assert!(stdout.contains("Server_Name"));
    assert!(stdout.contains("number"));

    let (stdout, _, ok) = run_shx(&config_path, &["schemas"]);
    assert!(ok);
    assert!(stdout.contains("No schemas stored"));
}

#[test]
fn test_schemas_and_schema() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, _, ok) = run_shx(&config_path, &["schemas"]);
    assert!(ok);
    assert!(stdout.contains("servers"));
    assert!(stdout.contains("servers.csv"));

    let (stdout, stderr, ok) = run_shx(&config_path, &["schema", "servers"]);
    assert!(ok, "schema failed: {}", stderr);
    let schema: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(schema["datasetName"], "servers");
    let columns = schema["columns"].as_array().unwrap();
    assert_eq!(columns.len(), 5);
    assert_eq!(columns[0]["normalizedName"], "Server_Name");
    assert_eq!(columns[2]["dataType"], "number");

    let (_, stderr, ok) = run_shx(&config_path, &["schema", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("nope"));
}

#[test]
fn test_query_fuzzy_string_field() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, ok) = run_shx(
        &config_path,
        &["query", "--dataset", "servers", "--filter", "data.Environment=prod", "--json"],
    );
    assert!(ok, "query failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let rows = result["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["data"]["Server_Name"], "SVR01");
    assert_eq!(rows[1]["data"]["Server_Name"], "SVR03");
    assert_eq!(rows[0]["metadata"]["row"], 2);
}

#[test]
fn test_query_numeric_field_is_exact() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, ok) = run_shx(
        &config_path,
        &["query", "--dataset", "servers", "--filter", "data.Port=443"],
    );
    assert!(ok, "query failed: {}", stderr);
    assert!(stdout.contains("SVR02"));
    assert!(stdout.contains("SVR03"));
    assert!(!stdout.contains("SVR01"));
    assert!(stdout.contains("2 row(s)"));
}

#[test]
fn test_query_unknown_field_warns() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, ok) = run_shx(
        &config_path,
        &["query", "--dataset", "servers", "--filter", "data.Colour=red"],
    );
    assert!(ok, "query failed: {}", stderr);
    assert!(stderr.contains("unknown filter field data.Colour"), "stderr={}", stderr);
    assert!(stdout.contains("No rows found."));
}

#[test]
fn test_query_limit() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, _, ok) = run_shx(&config_path, &["query", "--limit", "1", "--json"]);
    assert!(ok);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["rows"].as_array().unwrap().len(), 1);
}

#[test]
fn test_decode_sentence() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, ok) = run_shx(
        &config_path,
        &[
            "decode",
            "Record from worksheet servers, row 2: schema_id is s-1. Host is web-01. Port is 8080.",
        ],
    );
    assert!(ok, "decode failed: {}", stderr);
    let row: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(row["data"]["Host"], "web-01");
    assert_eq!(row["data"]["Port"], 8080.0);
    assert_eq!(row["metadata"]["schema_id"], "s-1");
    assert_eq!(row["metadata"]["row"], 2);
}

#[test]
fn test_import_xlsx_sheet() {
    let (tmp, config_path) = setup_test_env();
    let racks = tmp.path().join("racks.xlsx");
    write_xlsx(&racks);

    run_shx(&config_path, &["init"]);
    let (stdout, stderr, ok) = run_shx(
        &config_path,
        &["import", racks.to_str().unwrap(), "--progress", "off"],
    );
    assert!(ok, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("rows written: 2"));

    let (stdout, stderr, ok) = run_shx(
        &config_path,
        &["query", "--filter", "dataset_name=Racks", "--filter", "data.Units=42", "--json"],
    );
    assert!(ok, "query failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let rows = result["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["data"]["Rack"], "R-A1");
}

#[test]
fn test_corrupt_file_is_skipped() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("sheets/broken.xlsx"), b"not a zip").unwrap();

    run_shx(&config_path, &["init"]);
    let (stdout, stderr, ok) = run_shx(&config_path, &["import", "--progress", "off"]);
    assert!(ok, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files: 2"));
    assert!(stdout.contains("files failed: 1"));
    assert!(stdout.contains("rows written: 3"));
}
