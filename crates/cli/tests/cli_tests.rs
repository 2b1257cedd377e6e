use hnswflow_core::{save_graph, InMemoryGraph};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn write_rows(path: &Path, rows: &[Vec<[u8; 4]>]) {
    let dim = rows.first().map_or(0, |r| r.len());
    let mut out = Vec::new();
    out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    for row in rows {
        for w in row {
            out.extend_from_slice(w);
        }
    }
    fs::write(path, out).unwrap();
}

/// 5 points on a line, base layer is a path, nodes 0 and 4 also on level 1.
fn setup() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut g = InMemoryGraph::new(2);
    for i in 0..5u32 {
        let mut base = Vec::new();
        if i > 0 {
            base.push(i - 1);
        }
        if i < 4 {
            base.push(i + 1);
        }
        let mut links = vec![base];
        if i == 0 {
            links.push(vec![4]);
        } else if i == 4 {
            links.push(vec![0]);
        }
        g.push_node(&[i as f32, 0.0], links).unwrap();
    }
    g.set_entry_point(0);
    save_graph(&g, &dir.path().join("graph.hgf")).unwrap();

    let queries = [[3.9f32, 0.0], [0.2, 0.0]];
    let rows: Vec<Vec<[u8; 4]>> = queries
        .iter()
        .map(|q| q.iter().map(|v| v.to_le_bytes()).collect())
        .collect();
    write_rows(&dir.path().join("queries.bin"), &rows);

    let truth = [[4i32, 3], [0, 1]];
    let rows: Vec<Vec<[u8; 4]>> = truth
        .iter()
        .map(|t| t.iter().map(|v| v.to_le_bytes()).collect())
        .collect();
    write_rows(&dir.path().join("truth.bin"), &rows);
    dir
}

fn hnswflow(dir: &Path, args: &[&str]) -> Vec<serde_json::Value> {
    let output = Command::new(env!("CARGO_BIN_EXE_hnswflow"))
        .current_dir(dir)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to run hnswflow");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_search_reports_each_query_and_summary() {
    let dir = setup();
    let variants: [&[&str]; 3] = [
        &[],
        &["--threaded", "--batch", "2", "--stages", "2"],
        &["--threaded", "--channels", "2", "--compute-channels", "3"],
    ];
    for extra in variants {
        let mut args = vec![
            "search",
            "--graph",
            "graph.hgf",
            "--queries",
            "queries.bin",
            "--ground-truth",
            "truth.bin",
            "--k",
            "2",
            "--json",
        ];
        args.extend_from_slice(extra);
        let lines = hnswflow(dir.path(), &args);
        assert_eq!(lines.len(), 3);

        assert_eq!(lines[0]["query"], 0);
        assert_eq!(lines[0]["neighbors"][0][0], 4);
        assert_eq!(lines[0]["recall"], 1.0);
        assert_eq!(lines[1]["neighbors"][0][0], 0);
        assert_eq!(lines[1]["neighbors"].as_array().unwrap().len(), 5);

        let summary = &lines[2];
        assert_eq!(summary["queries"], 2);
        assert_eq!(summary["failed"], 0);
        assert_eq!(summary["mean_recall"], 1.0);
    }
}

#[test]
fn test_inspect_prints_metadata() {
    let dir = setup();
    let output = Command::new(env!("CARGO_BIN_EXE_hnswflow"))
        .current_dir(dir.path())
        .args(["inspect", "--graph", "graph.hgf"])
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["nodes"], 5);
    assert_eq!(info["levels"], 2);
    assert_eq!(info["entry_point"], 0);
    assert_eq!(info["nodes_per_level"], serde_json::json!([5, 2]));
}

#[test]
fn test_dimension_mismatch_is_reported() {
    let dir = setup();
    write_rows(&dir.path().join("bad.bin"), &[vec![1.0f32.to_le_bytes(); 3]]);
    let output = Command::new(env!("CARGO_BIN_EXE_hnswflow"))
        .current_dir(dir.path())
        .args(["search", "--graph", "graph.hgf", "--queries", "bad.bin"])
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("dimension"));
}
