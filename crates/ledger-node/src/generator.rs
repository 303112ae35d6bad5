use crate::constants::{GENERATED_PAYLOAD_LEN, GENERATOR_INTERVAL_MS};
use ledger_core::Transaction;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;

/// Random uppercase payload for a synthetic transaction.
pub fn random_payload<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..GENERATED_PAYLOAD_LEN)
        .map(|_| rng.gen_range(b'A'..=b'Z') as char)
        .collect()
}

/// Emit a synthetic transaction after every randomized pause until the
/// receiving node goes away.
pub async fn generate_transactions(out: mpsc::UnboundedSender<Transaction>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    loop {
        let pause = rng.gen_range(GENERATOR_INTERVAL_MS);
        tokio::time::sleep(Duration::from_millis(pause)).await;
        if out.send(Transaction::new(random_payload(&mut rng))).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_uppercase_and_fixed_length() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let payload = random_payload(&mut rng);
            assert_eq!(payload.len(), GENERATED_PAYLOAD_LEN);
            assert!(payload.chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn generator_stops_when_receiver_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(generate_transactions(tx, 1));
        let first = rx.recv().await.unwrap();
        assert!(first.present);
        drop(rx);
        task.await.unwrap();
    }
}
