//! Row builders for generated test data.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use cosmos::models::campaign::LoyaltyType;
use rand::{
    Rng,
    distr::Alphanumeric,
    seq::IndexedRandom,
};

pub const PROFILE_CONFIG: &str = "email:\n  required: true\n\
first_name:\n  required: true\n\
last_name:\n  required: true\n\
date_of_birth:\n  required: true\n\
phone:\n  required: true\n\
address_line1:\n  required: true\n\
address_line2:\n  required: true\n\
postcode:\n  required: true\n\
city:\n  required: true";

pub const MARKETING_PREFERENCE_CONFIG: &str =
    "marketing_pref:\n  type: boolean\n  label: Sample Question?";

pub const ACCOUNT_NUMBER_PREFIX: &str = "RTST";
pub const REWARD_GOAL: i64 = 1000;
pub const PENDING_REWARD_VALUE: i64 = 200;
pub const REWARD_CODE_LENGTH: usize = 15;

/// Generated holders come in three balance flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountHolderType {
    ZeroBalance,
    IntegerBalance,
    FloatBalance,
}

impl AccountHolderType {
    pub const ALL: [AccountHolderType; 3] = [
        AccountHolderType::ZeroBalance,
        AccountHolderType::IntegerBalance,
        AccountHolderType::FloatBalance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountHolderType::ZeroBalance => "zero_balance",
            AccountHolderType::IntegerBalance => "integer_balance",
            AccountHolderType::FloatBalance => "float_balance",
        }
    }

    /// Two-digit index embedded in account numbers.
    pub fn index(&self) -> &'static str {
        match self {
            AccountHolderType::ZeroBalance => "00",
            AccountHolderType::IntegerBalance => "01",
            AccountHolderType::FloatBalance => "02",
        }
    }

    pub fn balance<R: Rng + ?Sized>(&self, max_val: i64, rng: &mut R) -> i64 {
        match self {
            AccountHolderType::ZeroBalance => 0,
            AccountHolderType::IntegerBalance => rng.random_range(1..=max_val) * 100,
            AccountHolderType::FloatBalance => {
                rng.random_range(1..=max_val) * 100 + rng.random_range(1..=99)
            }
        }
    }
}

pub fn email(holder_type: AccountHolderType, n: u64) -> String {
    format!("test_{}_user_{n:02}@autogen.bpl", holder_type.as_str())
}

/// `prefix + type index + n padded to 8 digits + random suffix`.
///
/// The suffix keeps numbers unique across retailers sharing the prefix.
pub fn account_number(prefix: &str, holder_type: AccountHolderType, n: u64, suffix: u32) -> String {
    format!("{prefix}{}{n:08}{suffix}", holder_type.index())
}

/// Title-cased slug, `test-retailer` → `Test Retailer`.
pub fn title_case(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardState {
    Issued,
    Cancelled,
    Expired,
    Redeemed,
    Pending,
}

/// Rewards given to the `n`th holder of each type, cycling every 11 holders.
pub fn reward_plan(n: u64) -> &'static [(usize, RewardState)] {
    use RewardState::*;
    match n % 11 {
        0 => &[],
        1 => &[(1, Issued)],
        2 => &[(1, Issued), (1, Expired)],
        3 => &[(3, Issued), (3, Redeemed)],
        4 => &[(1, Issued), (1, Cancelled)],
        5 => &[(1, Issued), (1, Pending)],
        6 => &[(1, Issued), (1, Expired), (1, Redeemed), (1, Cancelled), (1, Pending)],
        7 => &[(2, Issued)],
        8 => &[(3, Issued), (1, Expired), (3, Redeemed), (2, Cancelled), (3, Pending)],
        9 => &[(1, Issued), (3, Expired), (2, Redeemed), (1, Cancelled), (4, Pending)],
        _ => &[(2, Issued), (4, Expired), (3, Redeemed), (1, Cancelled), (5, Pending)],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardDates {
    pub issued_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub redeemed_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,
}

/// Dates giving an allocated reward the requested state. `Pending` is not a reward.
pub fn reward_dates(now: DateTime<Utc>, state: RewardState, days_ago: i64) -> Option<RewardDates> {
    let old_date = now - Duration::days(days_ago);
    let default_expiry = now + Duration::weeks(52);
    let dates = RewardDates {
        issued_date: old_date,
        expiry_date: default_expiry,
        redeemed_date: None,
        cancelled_date: None,
    };
    match state {
        RewardState::Issued => Some(dates),
        RewardState::Redeemed => Some(RewardDates {
            redeemed_date: Some(old_date),
            ..dates
        }),
        RewardState::Cancelled => Some(RewardDates {
            cancelled_date: Some(old_date),
            ..dates
        }),
        RewardState::Expired => Some(RewardDates {
            issued_date: old_date - Duration::days(1),
            expiry_date: old_date,
            ..dates
        }),
        RewardState::Pending => None,
    }
}

/// Purchase and refund amounts of a generated transaction history.
pub fn transaction_amounts(reward_goal: i64) -> [i64; 10] {
    [
        reward_goal / 4,
        -(reward_goal / 2),
        reward_goal / 2,
        reward_goal,
        -reward_goal,
        reward_goal * 3 / 2,
        -(reward_goal * 3 / 2),
        -(reward_goal * 2),
        reward_goal * 2,
        -(reward_goal / 4),
    ]
}

/// Earn recorded against a generated transaction: one stamp per purchase.
pub fn earn_amount(loyalty_type: LoyaltyType, amount: i64) -> i64 {
    match loyalty_type {
        LoyaltyType::Accumulator => amount,
        LoyaltyType::Stamps if amount > 0 => 100,
        LoyaltyType::Stamps => 0,
    }
}

pub fn reward_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REWARD_CODE_LENGTH)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

const FIRST_NAMES: &[&str] = &[
    "Oliver", "Amelia", "George", "Isla", "Harry", "Ava", "Noah", "Mia", "Jack", "Ivy",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Jones", "Taylor", "Brown", "Williams", "Wilson", "Johnson", "Davies", "Evans", "Walker",
];
const STREETS: &[&str] = &[
    "High Street", "Station Road", "Church Lane", "Victoria Road", "Park Avenue", "Mill Lane",
];
const CITIES: &[&str] = &[
    "London", "Manchester", "Leeds", "Bristol", "Sheffield", "Glasgow", "Cardiff", "York",
];
const POSTCODES: &[&str] = &["SW1A 1AA", "M1 1AE", "LS1 4DY", "BS1 5TR", "S1 2HE", "G1 1XQ"];

#[derive(Debug, Clone)]
pub struct FakeProfile {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: String,
    pub address_line1: String,
    pub address_line2: String,
    pub postcode: String,
    pub city: String,
}

fn pick<R: Rng + ?Sized>(values: &[&str], rng: &mut R) -> String {
    values.choose(rng).copied().unwrap_or_default().to_string()
}

pub fn fake_profile<R: Rng + ?Sized>(rng: &mut R) -> FakeProfile {
    let phone_prefix = if rng.random_bool(0.5) { "0" } else { "+44" };
    FakeProfile {
        first_name: pick(FIRST_NAMES, rng),
        last_name: pick(LAST_NAMES, rng),
        date_of_birth: NaiveDate::from_ymd_opt(
            rng.random_range(1940..=2004),
            rng.random_range(1..=12),
            rng.random_range(1..=28),
        ),
        phone: format!("{phone_prefix}7{:09}", rng.random_range(0..1_000_000_000u32)),
        address_line1: format!("{} {}", rng.random_range(1..=250), pick(STREETS, rng)),
        address_line2: String::new(),
        postcode: pick(POSTCODES, rng),
        city: pick(CITIES, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_and_account_numbers_follow_the_type() {
        assert_eq!(
            email(AccountHolderType::IntegerBalance, 7),
            "test_integer_balance_user_07@autogen.bpl"
        );
        assert_eq!(
            account_number("RTST", AccountHolderType::FloatBalance, 42, 9),
            "RTST02000000429"
        );
    }

    #[test]
    fn balances_match_the_holder_type() {
        let mut rng = rand::rng();
        assert_eq!(AccountHolderType::ZeroBalance.balance(100, &mut rng), 0);
        let integer = AccountHolderType::IntegerBalance.balance(100, &mut rng);
        assert!(integer % 100 == 0 && (100..=10_000).contains(&integer));
        let float = AccountHolderType::FloatBalance.balance(100, &mut rng);
        assert_ne!(float % 100, 0);
    }

    #[test]
    fn reward_plan_cycles_every_eleven() {
        assert!(reward_plan(0).is_empty());
        assert_eq!(reward_plan(1), reward_plan(12));
        let pending: usize = reward_plan(10)
            .iter()
            .filter(|(_, state)| *state == RewardState::Pending)
            .map(|(count, _)| count)
            .sum();
        assert_eq!(pending, 5);
    }

    #[test]
    fn reward_dates_produce_the_requested_state() {
        use cosmos::models::reward::RewardStatus;
        let now = Utc::now();
        for (state, status) in [
            (RewardState::Issued, RewardStatus::Issued),
            (RewardState::Redeemed, RewardStatus::Redeemed),
            (RewardState::Cancelled, RewardStatus::Cancelled),
            (RewardState::Expired, RewardStatus::Expired),
        ] {
            let dates = reward_dates(now, state, 3).unwrap();
            assert_eq!(
                RewardStatus::derive(
                    dates.cancelled_date,
                    dates.redeemed_date,
                    Some(dates.expiry_date),
                    now
                ),
                status
            );
        }
        assert!(reward_dates(now, RewardState::Pending, 3).is_none());
    }

    #[test]
    fn helpers() {
        assert_eq!(title_case("test-retailer"), "Test Retailer");
        assert_eq!(transaction_amounts(1000)[5], 1500);
        assert_eq!(earn_amount(LoyaltyType::Stamps, -500), 0);
        assert_eq!(earn_amount(LoyaltyType::Stamps, 500), 100);
        assert_eq!(reward_code(&mut rand::rng()).len(), REWARD_CODE_LENGTH);
    }
}
