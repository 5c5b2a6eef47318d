use std::{cmp::Ordering, str::FromStr};

use serde::Deserialize;

use super::{is_all, split_list, FilterError, Interval, SearchTerm, Selection};
use crate::db::models::FreelancerCard;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateBucket {
    #[default]
    All,
    /// Under 300 ₴/h.
    Economy,
    Standard,
    /// 800 ₴/h and above.
    Expert,
}

impl RateBucket {
    pub fn interval(self) -> Interval {
        match self {
            RateBucket::All => Interval::UNBOUNDED,
            RateBucket::Economy => Interval {
                min: None,
                max: Some(300.0),
            },
            RateBucket::Standard => Interval {
                min: Some(300.0),
                max: Some(800.0),
            },
            RateBucket::Expert => Interval {
                min: Some(800.0),
                max: None,
            },
        }
    }

    fn matches(self, rate: Option<f64>) -> bool {
        match self {
            RateBucket::All => true,
            bucket => rate.map_or(false, |r| bucket.interval().contains(r)),
        }
    }
}

impl FromStr for RateBucket {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(RateBucket::All),
            "economy" => Ok(RateBucket::Economy),
            "standard" => Ok(RateBucket::Standard),
            "expert" => Ok(RateBucket::Expert),
            _ => Err(FilterError::UnknownValue {
                dimension: "rate bucket",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreelancerSort {
    Newest,
    Oldest,
    RateHigh,
    RateLow,
    Name,
    Rating,
}

/// Orders present values with `cmp` and puts missing ones last.
fn missing_last<T>(a: Option<T>, b: Option<T>, cmp: impl FnOnce(T, T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl FreelancerSort {
    fn compare(self, a: &FreelancerCard, b: &FreelancerCard) -> Ordering {
        match self {
            FreelancerSort::Newest => b.created_at.cmp(&a.created_at),
            FreelancerSort::Oldest => a.created_at.cmp(&b.created_at),
            FreelancerSort::RateHigh => {
                missing_last(a.hourly_rate, b.hourly_rate, |x, y| y.total_cmp(&x))
            }
            FreelancerSort::RateLow => {
                missing_last(a.hourly_rate, b.hourly_rate, |x, y| x.total_cmp(&y))
            }
            FreelancerSort::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            FreelancerSort::Rating => missing_last(a.rating, b.rating, |x, y| y.total_cmp(&x)),
        }
    }
}

impl FromStr for FreelancerSort {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "newest" => Ok(FreelancerSort::Newest),
            "oldest" => Ok(FreelancerSort::Oldest),
            "rate_high" => Ok(FreelancerSort::RateHigh),
            "rate_low" => Ok(FreelancerSort::RateLow),
            "name" => Ok(FreelancerSort::Name),
            "rating" => Ok(FreelancerSort::Rating),
            _ => Err(FilterError::UnknownValue {
                dimension: "sort",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreelancerFilters {
    pub search: SearchTerm,
    pub rate: RateBucket,
    pub skills: Selection,
    /// Matched against the categories of the freelancer's skills.
    pub categories: Selection,
    pub min_rating: Option<f64>,
    pub sort: Option<FreelancerSort>,
}

impl FreelancerFilters {
    pub fn matches(&self, card: &FreelancerCard) -> bool {
        self.search.matches_any(
            [card.name.as_str()]
                .into_iter()
                .chain(card.bio.as_deref())
                .chain(card.skills.iter().map(|s| s.name.as_str())),
        ) && self.rate.matches(card.hourly_rate)
            && self
                .skills
                .intersects(card.skills.iter().map(|s| s.name.as_str()))
            && self
                .categories
                .intersects(card.skills.iter().map(|s| s.category.as_str()))
            && self
                .min_rating
                .map_or(true, |min| card.rating.map_or(false, |r| r >= min))
    }
}

pub fn filter_freelancers<'a>(
    cards: &'a [FreelancerCard],
    filters: &FreelancerFilters,
) -> Vec<&'a FreelancerCard> {
    let mut matched: Vec<&FreelancerCard> = cards.iter().filter(|c| filters.matches(c)).collect();
    if let Some(sort) = filters.sort {
        matched.sort_by(|a, b| sort.compare(a, b));
    }
    matched
}

#[derive(Debug, Default, Deserialize)]
pub struct FreelancerListQuery {
    pub search: Option<String>,
    pub rate: Option<String>,
    pub skills: Option<String>,
    pub categories: Option<String>,
    pub min_rating: Option<String>,
    pub sort: Option<String>,
}

impl TryFrom<FreelancerListQuery> for FreelancerFilters {
    type Error = FilterError;

    fn try_from(query: FreelancerListQuery) -> Result<Self, Self::Error> {
        let min_rating = if is_all(query.min_rating.as_deref()) {
            None
        } else {
            let raw = query.min_rating.as_deref().unwrap_or_default().trim();
            let invalid = || FilterError::InvalidNumber {
                dimension: "minimum rating",
                value: raw.to_string(),
            };
            // NaN would compare false against every rating.
            let value = raw.parse::<f64>().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }
            Some(value)
        };

        Ok(Self {
            search: SearchTerm::new(query.search.as_deref()),
            rate: query.rate.as_deref().unwrap_or("all").parse()?,
            skills: Selection::new(split_list(query.skills.as_deref())),
            categories: Selection::new(split_list(query.categories.as_deref())),
            min_rating,
            sort: if is_all(query.sort.as_deref()) {
                None
            } else {
                Some(query.sort.as_deref().unwrap_or_default().parse()?)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::db::models::{Proficiency, UserSkill};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn skill(name: &str, category: &str) -> UserSkill {
        UserSkill {
            skill_id: format!("skill-{}", name.to_lowercase()),
            name: name.to_string(),
            category: category.to_string(),
            proficiency: Proficiency::Advanced,
        }
    }

    fn card(id: &str, name: &str, rate: Option<f64>, rating: Option<f64>, created: i64) -> FreelancerCard {
        FreelancerCard {
            id: id.to_string(),
            name: name.to_string(),
            bio: None,
            hourly_rate: rate,
            skills: vec![],
            rating,
            rating_count: rating.map_or(0, |_| 1),
            created_at: at(created),
        }
    }

    fn sample() -> Vec<FreelancerCard> {
        let mut olena = card("olena", "Olena Kovalenko", Some(250.0), Some(4.8), 10);
        olena.bio = Some("Brand identity and illustration".to_string());
        olena.skills = vec![skill("Figma", "design"), skill("Photoshop", "design")];

        let mut taras = card("taras", "taras Shevchuk", Some(900.0), Some(4.2), 30);
        taras.skills = vec![skill("Rust", "web_development"), skill("SQL", "data")];

        let mut iryna = card("iryna", "Iryna Bondar", None, None, 20);
        iryna.skills = vec![skill("Copywriting", "writing")];

        vec![olena, taras, iryna]
    }

    fn ids(cards: &[&FreelancerCard]) -> Vec<String> {
        cards.iter().map(|c| c.id.clone()).collect()
    }

    #[test]
    fn default_filters_are_identity() {
        let cards = sample();
        let out = filter_freelancers(&cards, &FreelancerFilters::default());
        assert_eq!(ids(&out), vec!["olena", "taras", "iryna"]);
    }

    #[test]
    fn search_covers_name_bio_and_skills() {
        let cards = sample();
        let search = |term: &str| {
            let filters = FreelancerFilters {
                search: SearchTerm::new(Some(term)),
                ..Default::default()
            };
            ids(&filter_freelancers(&cards, &filters))
        };
        assert_eq!(search("bondar"), vec!["iryna"]);
        assert_eq!(search("illustration"), vec!["olena"]);
        assert_eq!(search("rust"), vec!["taras"]);
        assert!(search("haskell").is_empty());
    }

    #[test]
    fn missing_rate_never_matches_a_bucket() {
        let cards = sample();
        for bucket in [RateBucket::Economy, RateBucket::Standard, RateBucket::Expert] {
            let filters = FreelancerFilters {
                rate: bucket,
                ..Default::default()
            };
            let out = filter_freelancers(&cards, &filters);
            assert!(out.iter().all(|c| c.hourly_rate.is_some()));
            assert!(out
                .iter()
                .all(|c| bucket.interval().contains(c.hourly_rate.unwrap())));
        }
    }

    #[test]
    fn skill_and_category_dimensions() {
        let cards = sample();
        let filters = FreelancerFilters {
            skills: Selection::new(["figma", "sql"]),
            ..Default::default()
        };
        assert_eq!(ids(&filter_freelancers(&cards, &filters)), vec!["olena", "taras"]);

        let filters = FreelancerFilters {
            skills: Selection::new(["figma", "sql"]),
            categories: Selection::new(["data"]),
            ..Default::default()
        };
        assert_eq!(ids(&filter_freelancers(&cards, &filters)), vec!["taras"]);
    }

    #[test]
    fn min_rating_excludes_unrated() {
        let cards = sample();
        let filters = FreelancerFilters {
            min_rating: Some(4.5),
            ..Default::default()
        };
        assert_eq!(ids(&filter_freelancers(&cards, &filters)), vec!["olena"]);

        let filters = FreelancerFilters {
            min_rating: Some(0.0),
            ..Default::default()
        };
        assert_eq!(ids(&filter_freelancers(&cards, &filters)), vec!["olena", "taras"]);
    }

    #[test]
    fn sorts_put_missing_values_last() {
        let cards = sample();
        let sorted = |sort| {
            let filters = FreelancerFilters {
                sort: Some(sort),
                ..Default::default()
            };
            ids(&filter_freelancers(&cards, &filters))
        };
        assert_eq!(sorted(FreelancerSort::RateHigh), vec!["taras", "olena", "iryna"]);
        assert_eq!(sorted(FreelancerSort::RateLow), vec!["olena", "taras", "iryna"]);
        assert_eq!(sorted(FreelancerSort::Rating), vec!["olena", "taras", "iryna"]);
        assert_eq!(sorted(FreelancerSort::Name), vec!["iryna", "olena", "taras"]);
        assert_eq!(sorted(FreelancerSort::Newest), vec!["taras", "iryna", "olena"]);
        assert_eq!(sorted(FreelancerSort::Oldest), vec!["olena", "iryna", "taras"]);
    }

    #[test]
    fn invalid_min_rating_is_rejected() {
        let query = FreelancerListQuery {
            min_rating: Some("high".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            FreelancerFilters::try_from(query),
            Err(FilterError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn non_finite_min_rating_is_rejected() {
        for raw in ["NaN", "inf", "-infinity"] {
            let query = FreelancerListQuery {
                min_rating: Some(raw.to_string()),
                ..Default::default()
            };
            assert_eq!(
                FreelancerFilters::try_from(query).unwrap_err(),
                FilterError::InvalidNumber {
                    dimension: "minimum rating",
                    value: raw.to_string()
                }
            );
        }
    }

    #[test]
    fn bucket_and_sort_names_ignore_case() {
        let query = FreelancerListQuery {
            rate: Some("Economy".to_string()),
            min_rating: Some("ALL".to_string()),
            sort: Some("RATE_LOW".to_string()),
            ..Default::default()
        };
        let filters = FreelancerFilters::try_from(query).unwrap();
        assert_eq!(filters.rate, RateBucket::Economy);
        assert_eq!(filters.min_rating, None);
        assert_eq!(filters.sort, Some(FreelancerSort::RateLow));
        assert_eq!("All".parse::<RateBucket>().unwrap(), RateBucket::All);
    }

    #[test]
    fn query_parses_into_filters() {
        let query = FreelancerListQuery {
            rate: Some("expert".to_string()),
            skills: Some("rust,sql".to_string()),
            min_rating: Some("4".to_string()),
            sort: Some("rating".to_string()),
            ..Default::default()
        };
        let filters = FreelancerFilters::try_from(query).unwrap();
        assert_eq!(filters.rate, RateBucket::Expert);
        assert_eq!(filters.min_rating, Some(4.0));
        assert_eq!(filters.sort, Some(FreelancerSort::Rating));
    }
}
