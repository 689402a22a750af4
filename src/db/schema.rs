use rusqlite::Connection;

/// Initialize the database schema. Safe to run on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- One checkout attempt covering one or more lessons.
        -- status only moves pending -> completed | failed | expired.
        CREATE TABLE IF NOT EXISTS payment_sessions (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            instructor_id TEXT NOT NULL,
            gateway TEXT NOT NULL CHECK (gateway IN ('stripe', 'mock')),
            external_reference TEXT,
            amount_total_cents INTEGER NOT NULL CHECK (amount_total_cents > 0),
            credit_applied_cents INTEGER NOT NULL DEFAULT 0 CHECK (credit_applied_cents >= 0),
            amount_due_cents INTEGER NOT NULL CHECK (amount_due_cents >= 0),
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'failed', 'expired')),
            bookings_payload TEXT NOT NULL,
            reschedule_of_booking_id TEXT REFERENCES bookings(id),
            failure_reason TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            completed_at INTEGER,
            CHECK (credit_applied_cents + amount_due_cents = amount_total_cents)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_sessions_reference
            ON payment_sessions(external_reference) WHERE external_reference IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_payment_sessions_pending
            ON payment_sessions(expires_at) WHERE status = 'pending';
        CREATE INDEX IF NOT EXISTS idx_payment_sessions_student ON payment_sessions(student_id);

        -- Paid lessons. Never deleted.
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            instructor_id TEXT NOT NULL,
            lesson_datetime INTEGER NOT NULL,
            duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
            pickup_location TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('confirmed', 'completed', 'cancelled', 'rescheduled')),
            amount_charged_cents INTEGER NOT NULL CHECK (amount_charged_cents >= 0),
            credit_applied_cents INTEGER NOT NULL CHECK (credit_applied_cents >= 0),
            payment_session_id TEXT NOT NULL REFERENCES payment_sessions(id),
            predecessor_booking_id TEXT REFERENCES bookings(id),
            created_at INTEGER NOT NULL,
            cancelled_at INTEGER,
            cancelled_by TEXT CHECK (cancelled_by IS NULL OR cancelled_by IN ('student', 'instructor', 'admin')),
            cancel_reason TEXT,
            credit_granted_cents INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_bookings_session ON bookings(payment_session_id);
        CREATE INDEX IF NOT EXISTS idx_bookings_student ON bookings(student_id, lesson_datetime);
        -- A booking can be rescheduled into at most one successor
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bookings_predecessor
            ON bookings(predecessor_booking_id) WHERE predecessor_booking_id IS NOT NULL;

        -- Non-cash credit from cancellations, drawn down oldest-first.
        CREATE TABLE IF NOT EXISTS credit_ledger (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            source_booking_id TEXT NOT NULL REFERENCES bookings(id),
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            remaining_cents INTEGER NOT NULL
                CHECK (remaining_cents >= 0 AND remaining_cents <= amount_cents),
            created_at INTEGER NOT NULL
        );
        -- One grant per source booking (cancel and reschedule are mutually exclusive)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_credit_ledger_source ON credit_ledger(source_booking_id);
        CREATE INDEX IF NOT EXISTS idx_credit_ledger_available
            ON credit_ledger(student_id, created_at) WHERE remaining_cents > 0;

        -- Payments the engine could not apply; settled by a human.
        CREATE TABLE IF NOT EXISTS reconciliation_items (
            id TEXT PRIMARY KEY,
            payment_session_id TEXT NOT NULL REFERENCES payment_sessions(id),
            external_reference TEXT,
            reason TEXT NOT NULL CHECK (reason IN ('late_completion', 'creation_failed')),
            details TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reconciliation_open
            ON reconciliation_items(payment_session_id, reason) WHERE resolved_at IS NULL;
        "#,
    )
}
