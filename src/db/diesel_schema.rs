// Diesel table declarations. Keep in sync with `schema.rs`.

diesel::table! {
    quests (id) {
        id -> Text,
        group_id -> Text,
        creator_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        reward_amount -> BigInt,
        reward_currency -> Text,
        category -> Text,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        expires_at -> Text,
    }
}

diesel::table! {
    quest_participants (quest_id, user_id) {
        quest_id -> Text,
        user_id -> Text,
        status -> Text,
        settlement_status -> Nullable<Text>,
        settlement_tx -> Nullable<Text>,
        settlement_error -> Nullable<Text>,
        joined_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    user_achievements (user_id, achievement_id) {
        user_id -> Text,
        achievement_id -> Integer,
        granted_at -> Text,
    }
}

diesel::table! {
    user_activities (id) {
        id -> Integer,
        user_id -> Text,
        activity_type -> Text,
        metadata_json -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    user_wallets (user_id) {
        user_id -> Text,
        address -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(quest_participants -> quests (quest_id));

diesel::allow_tables_to_appear_in_same_query!(
    quests,
    quest_participants,
    user_achievements,
    user_activities,
    user_wallets,
);
