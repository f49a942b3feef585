diesel::table! {
    users (id) {
        id -> Int4,
        email -> Text,
        password_hash -> Text,
        name -> Text,
        role -> Text,
        company_id -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Int4,
        company_id -> Int4,
        subject -> Text,
        description -> Nullable<Text>,
        segment -> Nullable<Text>,
        channel -> Nullable<Text>,
        address -> Nullable<Text>,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_analysis (id) {
        id -> Int4,
        ticket_id -> Int4,
        company_id -> Int4,
        ticket_type -> Nullable<Text>,
        priority -> Nullable<Int4>,
        sentiment -> Nullable<Text>,
        summary -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    managers (id) {
        id -> Int4,
        company_id -> Int4,
        user_id -> Nullable<Int4>,
        name -> Text,
        position -> Nullable<Text>,
        office -> Text,
        current_load -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    business_units (id) {
        id -> Int4,
        company_id -> Int4,
        office -> Text,
        address -> Nullable<Text>,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    assignments (id) {
        id -> Int4,
        ticket_id -> Int4,
        analysis_id -> Nullable<Int4>,
        manager_id -> Int4,
        office_id -> Nullable<Int4>,
        reason -> Text,
        created_at -> Timestamptz,
    }
}
