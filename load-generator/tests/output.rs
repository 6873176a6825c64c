use std::fs;
use std::path::Path;
use std::process::Command;

use pretty_assertions::assert_eq;

const BIN: &str = env!("CARGO_BIN_EXE_sql-load-generator");

const CONFIG: &str = "\
# Two tables and an index
seed=21
rows=4
clients=2
statements=12
mspt=3
mix.update=30
mix.insert=30
mix.delete=10
rollback=25
version=16

table.authors=Writers
authors.column.1=id
authors.column.1.type=serial
authors.column.1.primarykey=true
authors.column.2=name
authors.column.2.type=varchar(32)
authors.column.2.notnull=true
authors.column.3=email
authors.column.3.type=text
authors.column.3.unique=true

table.posts=
posts.partitions=2
posts.column.1=id
posts.column.1.type=bigint
posts.column.2=author_id
posts.column.2.type=integer
posts.column.2.foreignkey.table=authors
posts.column.3=published
posts.column.3.type=timestamp

index.posts.1=published
";

fn run(args: &[&str]) -> std::process::Output {
    Command::new(BIN)
        .args(args)
        .env("LOG_LEVEL", "warn")
        .output()
        .unwrap()
}

fn write_config(dir: &Path, name: &str, text: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path.to_str().unwrap().to_owned()
}

#[test]
fn writes_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "blog.properties", CONFIG);
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let output = run(&["-c", &config, "-o", out.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let run_dir = out.join("blog");
    let ddl = fs::read_to_string(run_dir.join("ddl.sql")).unwrap();
    let statements = ddl.split(";\n").collect::<Vec<_>>();
    assert_eq!(statements[0], "DROP TABLE IF EXISTS posts CASCADE");
    assert_eq!(statements[1], "DROP TABLE IF EXISTS authors CASCADE");
    assert!(ddl.contains("CREATE TABLE posts (\n    id bigint,\n    author_id integer,\n    published timestamp\n) PARTITION BY HASH (id);"));
    assert!(ddl.contains(
        "CREATE TABLE posts_p1 PARTITION OF posts FOR VALUES WITH (MODULUS 2, REMAINDER 1);"
    ));
    assert!(ddl.contains("COMMENT ON TABLE authors IS 'Writers';"));
    assert!(ddl.contains("CREATE INDEX idx_posts_id ON posts (id);"));
    assert!(ddl.contains("ADD CONSTRAINT uniq_authors_id_email UNIQUE (email);"));
    assert!(ddl.ends_with("CREATE INDEX idx_posts_published ON posts (published);\n"));

    let data = fs::read_to_string(run_dir.join("data.sql")).unwrap();
    assert!(data.starts_with("BEGIN;\nINSERT INTO authors (name, email) VALUES\n"));
    assert!(data.ends_with("COMMIT;\nANALYZE;\n"));

    for client in 1..=2 {
        let script = fs::read_to_string(run_dir.join(format!("{client}.cli"))).unwrap();
        let lines = script.lines().collect::<Vec<_>>();
        assert_eq!(lines.len() % 4, 0);
        assert_eq!(&lines[..4], &["P", "BEGIN", "", ""]);
        assert!(lines.chunks(4).all(|record| record[0] == "P"));
    }
    assert!(!run_dir.join("3.cli").exists());

    let catalog = fs::read_to_string(run_dir.join("blog-queryanalyzer.properties")).unwrap();
    let lines = catalog.lines().collect::<Vec<_>>();
    assert!(!lines.is_empty());
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);
    let width = lines.len().to_string().len();
    for line in lines {
        let (key, sql) = line.split_once('=').unwrap();
        let (kind, n) = key
            .strip_prefix("query.")
            .and_then(|k| k.split_once('.'))
            .unwrap();
        assert!(["select", "update", "insert", "delete"].contains(&kind), "{key}");
        assert_eq!(n.len(), width, "{key}");
        assert!(sql.to_lowercase().starts_with(kind), "{line}");
    }
}

#[test]
fn seed_flag_reproduces_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "repro.properties",
        &CONFIG.replace("seed=21\n", ""),
    );
    let (a, b) = (dir.path().join("a"), dir.path().join("b"));
    for out in [&a, &b] {
        fs::create_dir(out).unwrap();
        let output = run(&["-c", &config, "-o", out.to_str().unwrap(), "--seed", "99"]);
        assert!(output.status.success());
    }

    for file in ["ddl.sql", "data.sql", "1.cli", "2.cli", "repro-queryanalyzer.properties"] {
        assert_eq!(
            fs::read_to_string(a.join("repro").join(file)).unwrap(),
            fs::read_to_string(b.join("repro").join(file)).unwrap(),
            "{file}"
        );
    }
}

#[test]
fn scales_apply_to_rows_and_statements() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "scaled.properties", CONFIG);
    let out = dir.path().to_str().unwrap();

    let output = run(&["-c", &config, "-o", out, "-s", "2.5", "-t", "0.5"]);
    assert!(output.status.success());

    let data = fs::read_to_string(dir.path().join("scaled/data.sql")).unwrap();
    // 4 rows scaled by 2.5 for each of the two tables
    assert_eq!(data.lines().filter(|l| l.starts_with('(')).count(), 20);

    let script = fs::read_to_string(dir.path().join("scaled/1.cli")).unwrap();
    let statements = script
        .lines()
        .collect::<Vec<_>>()
        .chunks(4)
        .filter(|r| !["BEGIN", "COMMIT", "ROLLBACK"].contains(&r[1]))
        .count();
    assert_eq!(statements, 6);
}

#[test]
fn invalid_configurations_fail() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "broken.properties",
        "table.t=\nt.column.1=id\nt.column.1.type=integr\n",
    );

    let output = run(&["-c", &config, "-o", dir.path().to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("t.id"), "{stderr}");
    assert!(!dir.path().join("broken/ddl.sql").exists());

    let output = run(&["-c", &dir.path().join("missing.properties").to_string_lossy()]);
    assert!(!output.status.success());
}
