use super::*;

#[test]
fn test_storage_parse() {
    assert_eq!("local".parse::<Storage>().unwrap(), Storage::Local);
    assert_eq!("Memory".parse::<Storage>().unwrap(), Storage::Memory);
}

#[test]
fn test_storage_parse_rejects_unknown() {
    let err = "s3".parse::<Storage>().unwrap_err();
    assert!(err.contains("local and memory"));
}

#[test]
fn test_storage_display_round_trips() {
    for storage in [Storage::Local, Storage::Memory] {
        assert_eq!(storage.to_string().parse::<Storage>().unwrap(), storage);
    }
}

#[test]
fn test_log_level_parse() {
    assert_eq!("debug".parse::<LogLevel>().unwrap().as_filter(), "debug");
    assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert!("trace".parse::<LogLevel>().is_err());
}

#[tokio::test]
async fn test_open_memory_saver() {
    let saver = open_saver(Storage::Memory, "unused").unwrap();
    assert!(saver.get("/nothing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_open_local_saver_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("hput.db");

    let saver = open_saver(Storage::Local, root.to_str().unwrap()).unwrap();
    saver
        .put(hput_common::Payload::Text("kept".into()), "/note")
        .await
        .unwrap();

    assert!(root.is_dir());
    let reopened = open_saver(Storage::Local, root.to_str().unwrap()).unwrap();
    let runnable = reopened.get("/note").await.unwrap().unwrap();
    assert_eq!(runnable.text(), Some("kept"));
}
