//! End-to-end behaviour of a retriever over a temporary data directory.

use std::time::Duration;

use rolerag::{
    DataDir,
    DocumentKey,
    DocumentMetadata,
    EmbeddingProvider,
    EmbeddingTask,
    Error,
    Retriever,
    Role,
    Settings,
    Team,
    embedding::RetryPolicy,
    ingestion::IngestOutcome,
};

/// Letter-frequency vectors; refuses any text containing "poison".
struct LetterProvider;

impl EmbeddingProvider for LetterProvider {
    fn embed(
        &self,
        texts: &[String],
        _task: EmbeddingTask,
    ) -> rolerag::Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(Error::Embedding("refused".into()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0; 26];
                for c in t.to_ascii_lowercase().bytes() {
                    if c.is_ascii_lowercase() {
                        v[(c - b'a') as usize] += 1.0;
                    }
                }
                v
            })
            .collect())
    }

    fn name(&self) -> &str {
        "letters"
    }
}

fn settings() -> Settings {
    Settings {
        batch_pause: Duration::ZERO,
        retry: RetryPolicy {
            attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        context_header: false,
        ..Settings::default()
    }
}

fn open(tmp: &tempfile::TempDir) -> Retriever {
    let dir = DataDir::resolve(Some(tmp.path())).unwrap();
    Retriever::open(&dir, Box::new(LetterProvider), settings()).unwrap()
}

fn doc(file_name: &str, team: Team) -> DocumentMetadata {
    let mut meta = DocumentMetadata::new(file_name);
    meta.team = team;
    meta
}

/// Policy_2024 (Risk Tribe, three chunks) and Guide_Intro (Unassigned,
/// two chunks).
fn seeded() -> (tempfile::TempDir, Retriever) {
    let tmp = tempfile::tempdir().unwrap();
    let mut r = open(&tmp);
    let report = r.ingest_chunks(
        doc("Policy_2024.pdf", Team::RiskTribe),
        vec![
            "credit limits for retail loans".into(),
            "collateral rules".into(),
            "risk appetite statement".into(),
        ],
    );
    assert_eq!(report.outcome, IngestOutcome::Indexed { chunks: 3 });
    let report = r.ingest_chunks(
        doc("Guide_Intro.pdf", Team::Unassigned),
        vec!["welcome to the bank".into(), "office hours".into()],
    );
    assert_eq!(report.outcome, IngestOutcome::Indexed { chunks: 2 });
    (tmp, r)
}

fn documents(results: &[rolerag::SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.document.as_str()).collect()
}

#[test]
fn team_member_sees_own_and_unassigned_documents() {
    let (_tmp, r) = seeded();
    let results = r
        .search("credit rules", Role::Member(Team::RiskTribe), Some(10))
        .unwrap();
    let docs = documents(&results);
    assert_eq!(results.len(), 5);
    assert!(docs.contains(&"Policy_2024"));
    assert!(docs.contains(&"Guide_Intro"));
}

#[test]
fn other_team_sees_only_unassigned_documents() {
    let (_tmp, r) = seeded();
    let results = r
        .search(
            "credit rules",
            Role::Member(Team::MobileApplicationTribe),
            Some(10),
        )
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(documents(&results).iter().all(|d| *d == "Guide_Intro"));
}

#[test]
fn admin_sees_a_superset_of_every_member_role() {
    let (_tmp, r) = seeded();
    let admin = r.search("rules", Role::Admin, Some(10)).unwrap();
    let admin_texts: Vec<&str> =
        admin.iter().map(|r| r.chunk_text.as_str()).collect();

    for team in Team::ALL {
        let member = r.search("rules", Role::Member(team), Some(10)).unwrap();
        for result in &member {
            assert!(admin_texts.contains(&result.chunk_text.as_str()));
        }
    }
}

#[test]
fn duplicate_text_is_returned_once() {
    let (_tmp, mut r) = seeded();
    r.ingest_chunks(
        doc("Guide_Copy.pdf", Team::Unassigned),
        vec!["office hours".into()],
    );
    let results = r.search("office hours", Role::Admin, Some(10)).unwrap();
    let hits = results
        .iter()
        .filter(|r| r.chunk_text == "office hours")
        .count();
    assert_eq!(hits, 1);
}

#[test]
fn removed_document_never_surfaces() {
    let (_tmp, r) = seeded();
    let before = r.store().len();
    assert!(r.remove_document(&DocumentKey::new("Guide_Intro")).unwrap());

    assert_eq!(r.store().len(), before);
    for role in [
        Role::Admin,
        Role::Member(Team::RiskTribe),
        Role::Member(Team::Unassigned),
    ] {
        let results = r.search("welcome office", role, Some(10)).unwrap();
        assert!(documents(&results).iter().all(|d| *d != "Guide_Intro"));
    }
    assert!(r.library(Role::Admin, None).unwrap().iter().all(|(k, _)| k.as_str() != "Guide_Intro"));
}

#[test]
fn embedding_failure_appends_nothing() {
    let (_tmp, mut r) = seeded();
    let before = r.store().len();
    let report = r.ingest_chunks(
        doc("Broken.pdf", Team::CardTribe),
        vec!["fine text".into(), "poison pill".into()],
    );

    assert!(report.is_failure());
    assert_eq!(r.store().len(), before);
    assert_eq!(r.store().vector_count(), before);
    assert!(
        r.metadata()
            .get(&DocumentKey::new("Broken"))
            .unwrap()
            .is_none()
    );
}

#[test]
fn alignment_holds_after_appends_and_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut r = open(&tmp);
        for i in 0..4 {
            r.ingest_chunks(
                doc(&format!("Doc_{i}.md"), Team::DataTribe),
                (0..=i).map(|j| format!("chunk {i} {j}")).collect(),
            );
        }
        assert_eq!(r.store().len(), 10);
        assert_eq!(r.store().vector_count(), 10);
    }

    let r = open(&tmp);
    let status = r.status().unwrap();
    assert_eq!((status.chunks, status.vectors), (10, 10));
    assert_eq!(status.dimension, Some(26));
    assert_eq!(status.health, "healthy");
}

#[test]
fn team_reassignment_applies_to_the_next_query() {
    let (_tmp, r) = seeded();
    let card = Role::Member(Team::CardTribe);
    assert!(
        documents(&r.search("collateral", card, Some(10)).unwrap())
            .iter()
            .all(|d| *d != "Policy_2024")
    );

    let mut meta = r
        .metadata()
        .get(&DocumentKey::new("Policy_2024"))
        .unwrap()
        .unwrap();
    meta.team = Team::CardTribe;
    r.metadata().upsert(&meta).unwrap();

    assert!(
        documents(&r.search("collateral", card, Some(10)).unwrap())
            .contains(&"Policy_2024")
    );
}
