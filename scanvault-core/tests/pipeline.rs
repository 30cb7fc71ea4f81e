//! End-to-end pipeline tests over a real on-disk batch: ingest → index →
//! search → megadoc build. Uploads are exercised separately; without an
//! object store the pipeline leaves megadocs in `SENDING`.

use std::path::Path;
use std::sync::Arc;

use scanvault_core::{Config, Corpus, Db, Document, Pipeline, Scan, Search, Status};

const TEXTS: [&str; 3] = [
    "Hello from Document #1",
    "Hello from Document #2",
    "Hello from Document #3",
];

const STEMS: [&str; 3] = [
    "000001_2022-09-27_13-12-42_image_5992",
    "000002_2022-09-27_13-12-56_image_5993",
    "000003_2022-09-27_13-13-04_image_5994",
];

fn test_config(root: &Path) -> Arc<Config> {
    let raw = format!(
        r#"
[app]
version = "0.2.0"
client_url = "https://archive.test"
root_path = "{}"
megadoc_types = [".txt", ".md"]

[db]
sql_path = "{}"
retries = 3
batch_size = 100

[s3]
url = "https://cdn.test"
endpoint = "https://s3.test"
region = "test"
space = "scanvault"
"#,
        root.display(),
        root.join("scanvault.db").display()
    );
    Arc::new(toml::from_str(&raw).expect("config"))
}

fn write_batch(root: &Path) {
    let json_dir = root.join("data/00/json/2022-09");
    let text_dir = root.join("data/00/text/2022-09");
    std::fs::create_dir_all(&json_dir).expect("mkdir json");
    std::fs::create_dir_all(&text_dir).expect("mkdir text");
    for (stem, text) in STEMS.iter().zip(TEXTS) {
        std::fs::write(json_dir.join(format!("{stem}.json")), "{}").expect("json");
        std::fs::write(text_dir.join(format!("{stem}.txt")), text).expect("text");
    }
}

fn build_pipeline(root: &Path) -> Pipeline {
    let config = test_config(root);
    let db = Db::open(&config.db.sql_path, config.db.retries).expect("db");
    Pipeline::new(db, config, None)
}

#[tokio::test]
async fn ingest_index_search_build_happy_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    let pipeline = build_pipeline(dir.path());

    let report = pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");
    assert_eq!(report.albums, 1);
    assert_eq!(report.ingest.scans_created, 3);
    assert_eq!(report.ingest.documents_created, 3);
    assert_eq!(report.index.indexed, 3);
    assert_eq!(report.index.corpus.document_count, 3);
    assert_eq!(report.index.corpus.checksum.len(), 8);

    let (scans, documents, corpus) = pipeline
        .db()
        .read(|conn| {
            Ok((
                Scan::get_total(conn)?,
                Document::get_total(conn)?,
                Corpus::get_latest(conn)?,
            ))
        })
        .expect("counts");
    assert_eq!(scans, 3);
    assert_eq!(documents, 3);
    assert_eq!(corpus.expect("corpus").document_count, 3);

    let search = pipeline
        .start_search("Hello", &[".txt".to_string()])
        .await
        .expect("search");
    assert_eq!(search.status, Status::Success);

    let (count, megadocs) = pipeline
        .db()
        .read(|conn| Ok((search.document_count(conn)?, search.megadocs(conn)?)))
        .expect("results");
    assert_eq!(count, 3);
    assert_eq!(megadocs.len(), 1);

    // no uploader configured, so the built megadoc waits in SENDING
    let megadoc = &megadocs[0];
    assert_eq!(megadoc.status, Status::Sending);
    assert_eq!(megadoc.progress, 100.0);
    assert_eq!(megadoc.filetype, ".txt");

    let content =
        std::fs::read_to_string(dir.path().join("data").join(&megadoc.path)).expect("artifact");
    let positions: Vec<usize> = TEXTS
        .iter()
        .map(|t| content.find(t).expect("section present"))
        .collect();
    assert!(positions[0] < positions[1] && positions[1] < positions[2]);
    assert_eq!(content.matches("---\ndate: ").count(), 3);
}

#[tokio::test]
async fn fuzzy_search_matches_all_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    let pipeline = build_pipeline(dir.path());
    pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");

    let search = pipeline
        .start_search("Hella~1", &[])
        .await
        .expect("search");
    let count = pipeline
        .db()
        .read(|conn| search.document_count(conn))
        .expect("count");
    assert_eq!(count, 3);
}

#[tokio::test]
async fn rerunning_search_reuses_megadoc() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    let pipeline = build_pipeline(dir.path());
    pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");

    let search = pipeline
        .start_search("Hello", &[".txt".to_string()])
        .await
        .expect("search");

    pipeline
        .run_search(&search.meta.guid, &[".txt".to_string()])
        .await
        .expect("second run");

    let megadocs = pipeline
        .db()
        .read(|conn| search.megadocs(conn))
        .expect("megadocs");
    assert_eq!(megadocs.len(), 1);
}

#[tokio::test]
async fn missing_text_file_degrades_gracefully() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    std::fs::remove_file(
        dir.path()
            .join("data/00/text/2022-09")
            .join(format!("{}.txt", STEMS[2])),
    )
    .expect("remove");

    let pipeline = build_pipeline(dir.path());
    let report = pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");
    assert_eq!(report.index.corpus.document_count, 3);
    assert_eq!(report.index.indexed, 2);
    assert_eq!(report.index.unreadable, 1);

    let search = pipeline
        .start_search("Hello", &[])
        .await
        .expect("search");
    let count = pipeline
        .db()
        .read(|conn| search.document_count(conn))
        .expect("count");
    assert_eq!(count, 2);
}

#[tokio::test]
async fn bad_filename_skips_but_album_ingests() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    std::fs::write(dir.path().join("data/00/json/2022-09/badname.json"), "{}")
        .expect("bad file");

    let pipeline = build_pipeline(dir.path());
    let report = pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");
    assert_eq!(report.ingest.bad_files, 1);
    assert_eq!(report.ingest.documents_created, 3);
}

#[tokio::test]
async fn search_results_stay_within_bound_corpus() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    let pipeline = build_pipeline(dir.path());
    pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");

    let search = pipeline.start_search("Hello", &[]).await.expect("search");
    let ok = pipeline
        .db()
        .read(|conn| {
            let corpus = search.corpus(conn)?;
            let mut all_members = true;
            for document in search.documents(conn)? {
                all_members &= corpus.contains(conn, &document.meta.guid)?;
            }
            Ok(all_members)
        })
        .expect("check");
    assert!(ok);
}

#[tokio::test]
async fn deleted_search_disappears() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_batch(dir.path());
    let pipeline = build_pipeline(dir.path());
    pipeline
        .start_load(&dir.path().join("data/00/json"))
        .await
        .expect("load");

    let search = pipeline.start_search("Hello", &[]).await.expect("search");
    let deleted = pipeline
        .db()
        .write(|conn| Search::delete(conn, &search.meta.guid))
        .expect("delete");
    assert!(deleted);

    let gone = pipeline
        .db()
        .read(|conn| Search::get(conn, &search.meta.guid))
        .expect("get");
    assert!(gone.is_none());
}
