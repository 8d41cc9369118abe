diesel::table! {
    departments (id) {
        id -> Uuid,
        name -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        full_name -> Text,
        email -> Text,
        role -> Varchar,
        department_id -> Nullable<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        ticket_number -> Text,
        subject -> Text,
        description -> Nullable<Text>,
        status -> Varchar,
        priority -> Varchar,
        department_id -> Uuid,
        client_id -> Nullable<Uuid>,
        assigned_agent_id -> Nullable<Uuid>,
        last_response_at -> Nullable<Timestamptz>,
        resolved_at -> Nullable<Timestamptz>,
        closed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_sla_tracking (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        first_response_due_at -> Timestamptz,
        first_response_at -> Nullable<Timestamptz>,
        first_response_breached -> Bool,
        resolution_due_at -> Timestamptz,
        resolution_at -> Nullable<Timestamptz>,
        resolution_breached -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sla_policies (id) {
        id -> Uuid,
        department_id -> Nullable<Uuid>,
        priority -> Varchar,
        first_response_hours -> Int4,
        resolution_hours -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    escalation_rules (id) {
        id -> Uuid,
        department_id -> Uuid,
        priority -> Varchar,
        hours_without_response -> Int4,
        escalate_to_agent_id -> Uuid,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    auto_close_configs (id) {
        id -> Uuid,
        days_after_resolved -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_messages (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        author_id -> Nullable<Uuid>,
        content -> Text,
        is_internal -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        target_user_id -> Uuid,
        kind -> Varchar,
        ticket_id -> Nullable<Uuid>,
        message -> Text,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(tickets -> departments (department_id));
diesel::joinable!(ticket_sla_tracking -> tickets (ticket_id));
diesel::joinable!(ticket_messages -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    departments,
    users,
    tickets,
    ticket_sla_tracking,
    sla_policies,
    escalation_rules,
    auto_close_configs,
    ticket_messages,
    notifications,
);
