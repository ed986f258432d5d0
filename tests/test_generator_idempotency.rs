mod helpers;

use std::sync::Arc;

use certmill::domain::ports::certificate_generator::CertificateGenerator;
use certmill::infrastructure::generator::{RegisteredGenerator, SequenceGenerator};
use certmill::infrastructure::persistence::CertificateRegistry;
use certmill::GenerationRequest;
use helpers::generators::FixedGenerator;
use helpers::test_db::setup_test_db;

fn request(claim_id: i64) -> GenerationRequest {
    GenerationRequest {
        claim_id,
        student_id: 7,
        course_id: 3,
        custom_data: None,
        custom_reg_number: None,
    }
}

#[tokio::test]
async fn test_duplicate_invocation_reuses_registration() {
    let db = setup_test_db().await;
    let registry = CertificateRegistry::new(db);

    let inner = Arc::new(FixedGenerator::new("ILC50099", 501));
    let generator = RegisteredGenerator::new(inner.clone(), registry);

    let first = generator.generate(&request(42)).await.unwrap();
    // At-least-once delivery can replay the same claim
    let second = generator.generate(&request(42)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.registration_number, "ILC50099");
    // The inner generator ran exactly once
    assert_eq!(inner.call_count(), 1);
}

#[tokio::test]
async fn test_distinct_claims_get_distinct_numbers() {
    let db = setup_test_db().await;
    let registry = CertificateRegistry::new(db.clone());

    let inner = Arc::new(SequenceGenerator::new(
        CertificateRegistry::new(db),
        "ILC",
    ));
    let generator = RegisteredGenerator::new(inner, registry);

    let a = generator.generate(&request(1)).await.unwrap();
    let b = generator.generate(&request(2)).await.unwrap();

    assert_ne!(a.registration_number, b.registration_number);
    assert_ne!(a.generated_cert_id, b.generated_cert_id);
}

#[tokio::test]
async fn test_custom_registration_number_is_honored() {
    let db = setup_test_db().await;
    let registry = CertificateRegistry::new(db.clone());

    let inner = Arc::new(SequenceGenerator::new(
        CertificateRegistry::new(db),
        "ILC",
    ));
    let generator = RegisteredGenerator::new(inner, registry);

    let outcome = generator
        .generate(&GenerationRequest {
            custom_reg_number: Some("SPECIAL-7".to_string()),
            ..request(3)
        })
        .await
        .unwrap();

    assert_eq!(outcome.registration_number, "SPECIAL-7");
}
