use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

const FIRST_NAMES: &[&str] = &[
    "Aaliyah", "Adam", "Alice", "Amir", "Ana", "Andre", "Bianca", "Boris", "Carlos", "Chen",
    "Chloe", "Daniel", "Dmitri", "Elena", "Emma", "Fatima", "Felix", "Grace", "Hana", "Hugo",
    "Ines", "Ivan", "Jamal", "Jonas", "Julia", "Kai", "Kenji", "Laura", "Leila", "Lucas",
    "Maria", "Mateo", "Mei", "Nadia", "Noah", "Olga", "Omar", "Paula", "Priya", "Quinn",
    "Rafael", "Rosa", "Sam", "Sofia", "Tariq", "Tomas", "Uma", "Victor", "Wei", "Yara",
    "Yusuf", "Zoe",
];

/// Human-looking display name: a first name followed by four digits
pub fn generate_name(rng: &mut impl Rng) -> String {
    let first_name = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];

    format!("{}{}", first_name, rng.gen_range(1000..=9999))
}

/// Seconds since the unix epoch. Times before the epoch map to zero.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0)
}

/// Microseconds between an epoch timestamp carried in a message and the
/// local receive time. Clamped to zero when clocks disagree.
pub fn round_trip_micros(start_at: f64, received_at: SystemTime) -> u64 {
    let micros = (epoch_seconds(received_at) - start_at) * 1_000_000.0;

    if micros.is_finite() && micros > 0.0 {
        micros as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::{rngs::SmallRng, SeedableRng};

    use super::*;

    #[test]
    fn test_generate_name() {
        let mut rng = SmallRng::seed_from_u64(1);

        for _ in 0..100 {
            let name = generate_name(&mut rng);
            let (first_name, digits) = name.split_at(name.len() - 4);

            assert!(FIRST_NAMES.contains(&first_name));
            assert!((1000..=9999).contains(&digits.parse::<u32>().unwrap()));
        }
    }

    #[test]
    fn test_round_trip_micros() {
        let sent_at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let received_at = sent_at + Duration::from_millis(250);

        let micros = round_trip_micros(epoch_seconds(sent_at), received_at);

        // f64 seconds near 1.7e9 resolve to roughly a quarter microsecond
        assert!((249_999..=250_001).contains(&micros), "{}", micros);

        assert_eq!(round_trip_micros(epoch_seconds(received_at), sent_at), 0);
        assert_eq!(round_trip_micros(f64::NAN, received_at), 0);
    }
}
