use rust_decimal::Decimal;
use switchboard_types::{ModelId, PriceEntry, PriceTable, ProviderId};

fn entry(input_milli: i64, output_milli: i64) -> PriceEntry {
    PriceEntry {
        input_per_1k: Decimal::new(input_milli, 3),
        output_per_1k: Decimal::new(output_milli, 3),
        per_image: None,
        per_audio_second: None,
    }
}

#[test]
fn token_cost_is_per_thousand() {
    let e = entry(2, 4); // $0.002 in, $0.004 out
    let cost = e.token_cost(1_000, 500);
    assert_eq!(cost, Decimal::new(4, 3)); // 0.002 + 0.002
}

#[test]
fn changes_since_reports_only_moved_rates() {
    let p = ProviderId::new("alpha");
    let m1 = ModelId::new("m1");
    let m2 = ModelId::new("m2");

    let old = PriceTable {
        version: 1,
        updated_at: None,
        entries: vec![
            (p.clone(), m1.clone(), entry(2, 4)),
            (p.clone(), m2.clone(), entry(1, 2)),
        ],
    };
    let new = PriceTable {
        version: 2,
        updated_at: None,
        entries: vec![
            (p.clone(), m1.clone(), entry(2, 4)),
            (p.clone(), m2.clone(), entry(3, 6)),
        ],
    };

    let changes = new.changes_since(&old);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].model, m2);
    assert_eq!(changes[0].previous, entry(1, 2));
}

#[test]
fn unknown_pair_has_no_rate() {
    let table = PriceTable::default();
    assert!(
        table
            .rate(&ProviderId::new("nope"), &ModelId::new("m"))
            .is_none()
    );
}
