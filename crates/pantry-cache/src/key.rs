use pantry_core::{HouseholdId, ListId, UserId};
use serde::{Deserialize, Serialize};

/// Identity of a cached query result.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "camelCase")]
pub enum QueryKey {
    #[serde(rename_all = "camelCase")]
    Inventory { household_id: HouseholdId },
    #[serde(rename_all = "camelCase")]
    ShoppingListItems {
        household_id: HouseholdId,
        list_id: ListId,
    },
    #[serde(rename_all = "camelCase")]
    Notifications { user_id: UserId },
}

impl QueryKey {
    pub fn inventory(household_id: impl Into<HouseholdId>) -> Self {
        Self::Inventory {
            household_id: household_id.into(),
        }
    }

    pub fn shopping_list(household_id: impl Into<HouseholdId>, list_id: impl Into<ListId>) -> Self {
        Self::ShoppingListItems {
            household_id: household_id.into(),
            list_id: list_id.into(),
        }
    }

    pub fn notifications(user_id: impl Into<UserId>) -> Self {
        Self::Notifications {
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inventory { household_id } => write!(f, "items:{household_id}"),
            Self::ShoppingListItems {
                household_id,
                list_id,
            } => write!(f, "shopping-list:{household_id}:{list_id}"),
            Self::Notifications { user_id } => write!(f, "notifications:{user_id}"),
        }
    }
}
