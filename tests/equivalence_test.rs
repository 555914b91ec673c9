//! Every backend must return the same ids and scores as the in-memory reference.

mod helpers;

use helpers::*;
use memstore::model::Note;
use memstore::store::{ListOptions, SearchOptions, SearchResult};
use memstore::Store;

/// A small corpus exercising every filter dimension.
fn corpus() -> Vec<(Note, Vec<f32>)> {
    let rows: [(&str, &str, &str, &[&str], &str, [f32; 3]); 8] = [
        ("a", "/p", "global", &["rust"], "2024-01-01T00:00:00Z", [1.0, 0.0, 0.0]),
        ("b", "/p", "global", &["rust", "db"], "2024-01-02T00:00:00Z", [0.9, 0.1, 0.0]),
        ("c", "/p", "feature-1", &["db"], "2024-01-03T00:00:00Z", [0.0, 1.0, 0.0]),
        ("d", "/p", "feature-1", &[], "2024-01-04T00:00:00Z", [0.5, 0.5, 0.5]),
        ("e", "/p", "global", &["Rust"], "2024-01-05T00:00:00Z", [-1.0, 0.0, 0.0]),
        ("f", "/q", "global", &["rust"], "2024-01-06T00:00:00Z", [1.0, 0.0, 0.0]),
        ("g", "/p", "global", &["rust"], "bogus", [0.7, 0.7, 0.0]),
        ("h", "/p", "feature-2", &["rust"], "2024-01-02T12:00:00Z", [0.0, 0.0, 1.0]),
    ];
    rows.iter()
        .map(|(id, project, group, tags, ts, v)| {
            let mut n = note_at(id, project, group, ts);
            n.tags = tags.iter().map(|t| t.to_string()).collect();
            (n, v.to_vec())
        })
        .collect()
}

fn queries() -> Vec<(Vec<f32>, SearchOptions)> {
    let q = vec![1.0, 0.2, 0.0];
    vec![
        (q.clone(), SearchOptions::new("/p", 10)),
        (q.clone(), SearchOptions::new("/p", 3)),
        (q.clone(), SearchOptions::new("/p", 10).with_group("feature-1")),
        (q.clone(), SearchOptions::new("/p", 10).with_tags(["rust"])),
        (q.clone(), SearchOptions::new("/p", 10).with_tags(["rust", "db"])),
        (
            q.clone(),
            SearchOptions::new("/p", 10)
                .since(utc("2024-01-02T00:00:00Z"))
                .until(utc("2024-01-04T00:00:00Z")),
        ),
        (vec![0.0, 0.0, 1.0], SearchOptions::new("/p", 10).with_tags(["rust"])),
        (vec![1.0, 0.0], SearchOptions::new("/p", 4)),
    ]
}

async fn load(store: &dyn Store) {
    for (note, embedding) in corpus() {
        store.add_note(note, &embedding).await.unwrap();
    }
}

fn assert_same(reference: &[SearchResult], other: &[SearchResult], label: &str) {
    let ref_ids: Vec<&str> = reference.iter().map(|r| r.note.id.as_str()).collect();
    let other_ids: Vec<&str> = other.iter().map(|r| r.note.id.as_str()).collect();
    assert_eq!(ref_ids, other_ids, "{label}: ids differ");
    for (r, o) in reference.iter().zip(other) {
        assert!(
            (r.score - o.score).abs() < 1e-5,
            "{label}: score for {} differs ({} vs {})",
            r.note.id,
            r.score,
            o.score
        );
        assert_eq!(r.note, o.note, "{label}: note {} differs", r.note.id);
    }
}

async fn compare_against_reference(other: &dyn Store, label: &str) {
    let reference = memory_fixture().await;
    load(reference.store()).await;
    load(other).await;

    for (i, (query, opts)) in queries().into_iter().enumerate() {
        let expected = reference.store().search(&query, &opts).await.unwrap();
        let actual = other.search(&query, &opts).await.unwrap();
        assert_same(&expected, &actual, &format!("{label} query {i}"));
    }

    for opts in [
        ListOptions::new("/p", 10),
        ListOptions::new("/p", 3).with_group("global"),
        ListOptions::new("/p", 10).with_tags(["rust"]),
    ] {
        let expected = reference.store().list_recent(&opts).await.unwrap();
        let actual = other.list_recent(&opts).await.unwrap();
        assert_eq!(expected, actual, "{label}: list_recent differs for {opts:?}");
    }
}

#[tokio::test]
async fn sqlite_matches_reference() {
    let fx = sqlite_fixture().await;
    compare_against_reference(fx.store(), "sqlite").await;
}

#[tokio::test]
async fn qdrant_matches_reference() {
    let Some(fx) = qdrant_fixture().await else {
        return;
    };
    compare_against_reference(fx.store(), "qdrant").await;
}

#[tokio::test]
async fn reference_pipeline_spot_checks() {
    let fx = memory_fixture().await;
    load(fx.store()).await;

    // "e" is opposite the query and still ranks, with the lowest score.
    let all = fx
        .store()
        .search(&[1.0, 0.0, 0.0], &SearchOptions::new("/p", 10))
        .await
        .unwrap();
    assert_eq!(all.len(), 7);
    assert_eq!(all.last().unwrap().note.id, "e");
    assert_score(all.last().unwrap().score, 0.0);

    // Window excludes "g" (unparsable) and the bound at 2024-01-04.
    let windowed = fx
        .store()
        .search(
            &[1.0, 0.0, 0.0],
            &SearchOptions::new("/p", 10)
                .since(utc("2024-01-02T00:00:00Z"))
                .until(utc("2024-01-04T00:00:00Z")),
        )
        .await
        .unwrap();
    let mut ids: Vec<&str> = windowed.iter().map(|r| r.note.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["b", "c", "h"]);
}
