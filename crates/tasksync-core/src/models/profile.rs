use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum ActivityLevel {
    Sedentary,
    Light,
    Moderate,
    Active,
    VeryActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum FitnessGoal {
    LoseWeight,
    Maintain,
    BuildMuscle,
    ImproveEndurance,
}

/// Daily nutrition targets. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NutritionTargets {
    pub calories: Option<u32>,
    pub protein_g: Option<u32>,
    pub carbs_g: Option<u32>,
    pub fat_g: Option<u32>,
    pub water_ml: Option<u32>,
}

/// One per user. A profile with every attribute absent is a valid
/// starting point, and so is no profile at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProfileRecord {
    pub user_id: String,
    pub display_name: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub activity_level: Option<ActivityLevel>,
    pub goal: Option<FitnessGoal>,
    #[serde(default)]
    pub targets: NutritionTargets,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            height_cm: None,
            weight_kg: None,
            age: None,
            gender: None,
            activity_level: None,
            goal: None,
            targets: NutritionTargets::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// True when no physical, lifestyle or nutrition attribute is set.
    pub fn is_blank(&self) -> bool {
        self.display_name.is_none()
            && self.height_cm.is_none()
            && self.weight_kg.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.activity_level.is_none()
            && self.goal.is_none()
            && self.targets == NutritionTargets::default()
    }

    /// Body mass index, when both height and weight are known.
    pub fn bmi(&self) -> Option<f64> {
        match (self.height_cm, self.weight_kg) {
            (Some(h), Some(w)) if h > 0.0 => {
                let meters = h / 100.0;
                Some(w / (meters * meters))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_profile_is_valid() {
        let profile = ProfileRecord::new("u1", Utc::now());
        assert!(profile.is_blank());
        assert_eq!(profile.bmi(), None);
        assert_eq!(profile.created_at, profile.updated_at);

        let json = serde_json::to_string(&profile).unwrap();
        let back: ProfileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_bmi() {
        let mut profile = ProfileRecord::new("u1", Utc::now());
        profile.height_cm = Some(180.0);
        profile.weight_kg = Some(81.0);
        let bmi = profile.bmi().unwrap();
        assert!((bmi - 25.0).abs() < 0.01);
        assert!(!profile.is_blank());
    }
}
