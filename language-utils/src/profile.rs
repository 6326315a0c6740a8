use crate::{Language, Proficiency};
use serde::{Deserialize, Serialize};

/// A row of the `profiles` table as returned by the `get_profile` RPC.
/// Every column may be null for a freshly created account.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ProfileRow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proficiency: Option<Proficiency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words_learned: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// The mutable columns of a profile. Only the fields that are set are written.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ProfileRowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words_learned: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proficiency: Option<Proficiency>,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GetProfileParams {
    pub p_user_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpdateProfileParams {
    pub p_user_id: String,
    pub p_updates: ProfileRowUpdate,
}
