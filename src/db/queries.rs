use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now, parse_ts, ts};
use crate::models::{
    Booking, BookingStatus, ChatMessage, ConversationSummary, CreditTransaction, EarningsBalance,
    EarningsStatus, EarningsTransaction, Notification, Order, OrderStatus, PaymentStatus, Payout,
    PayoutStatus, Practitioner, Room, Service, ServiceSession, ServiceType, Tier, User,
    WorkflowRun,
};

fn opt_ts(value: Option<String>) -> Option<NaiveDateTime> {
    value.map(|s| parse_ts(&s))
}

// ── Users ──

const USER_COLUMNS: &str = "id, email, full_name, phone, api_token, is_admin, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        phone: row.get(3)?,
        api_token: row.get(4)?,
        is_admin: row.get::<_, i32>(5)? != 0,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

pub fn create_user(conn: &Connection, user: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, full_name, phone, api_token, is_admin, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id,
            user.email,
            user.full_name,
            user.phone,
            user.api_token,
            user.is_admin as i32,
            ts(&user.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], user_from_row).optional()?)
}

pub fn get_user_by_token(conn: &Connection, token: &str) -> anyhow::Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE api_token = ?1");
    Ok(conn.query_row(&sql, params![token], user_from_row).optional()?)
}

pub fn email_taken(conn: &Connection, email: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE lower(email) = lower(?1)",
        params![email],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ── Practitioners ──

const PRACTITIONER_COLUMNS: &str = "id, user_id, display_name, bio, tier, timezone, availability, buffer_minutes, payout_account_id, is_active";

fn practitioner_from_row(row: &Row) -> rusqlite::Result<Practitioner> {
    Ok(Practitioner {
        id: row.get(0)?,
        user_id: row.get(1)?,
        display_name: row.get(2)?,
        bio: row.get(3)?,
        tier: Tier::parse(&row.get::<_, String>(4)?),
        timezone: row.get(5)?,
        availability: row.get(6)?,
        buffer_minutes: row.get(7)?,
        payout_account_id: row.get(8)?,
        is_active: row.get::<_, i32>(9)? != 0,
    })
}

pub fn save_practitioner(conn: &Connection, p: &Practitioner) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO practitioners (id, user_id, display_name, bio, tier, timezone, availability, buffer_minutes, payout_account_id, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
           display_name = excluded.display_name,
           bio = excluded.bio,
           tier = excluded.tier,
           timezone = excluded.timezone,
           availability = excluded.availability,
           buffer_minutes = excluded.buffer_minutes,
           payout_account_id = excluded.payout_account_id,
           is_active = excluded.is_active",
        params![
            p.id,
            p.user_id,
            p.display_name,
            p.bio,
            p.tier.as_str(),
            p.timezone,
            p.availability,
            p.buffer_minutes,
            p.payout_account_id,
            p.is_active as i32,
        ],
    )?;
    Ok(())
}

pub fn get_practitioner(conn: &Connection, id: &str) -> anyhow::Result<Option<Practitioner>> {
    let sql = format!("SELECT {PRACTITIONER_COLUMNS} FROM practitioners WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], practitioner_from_row).optional()?)
}

pub fn get_practitioner_by_user(
    conn: &Connection,
    user_id: &str,
) -> anyhow::Result<Option<Practitioner>> {
    let sql = format!("SELECT {PRACTITIONER_COLUMNS} FROM practitioners WHERE user_id = ?1");
    Ok(conn.query_row(&sql, params![user_id], practitioner_from_row).optional()?)
}

pub fn list_practitioners(conn: &Connection, limit: i64) -> anyhow::Result<Vec<Practitioner>> {
    let sql = format!(
        "SELECT {PRACTITIONER_COLUMNS} FROM practitioners WHERE is_active = 1 ORDER BY display_name ASC LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], practitioner_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Services ──

const SERVICE_COLUMNS: &str = "id, practitioner_id, name, description, service_type, price_cents, currency, duration_minutes, max_participants, sessions_included, is_active, created_at";

fn service_from_row(row: &Row) -> rusqlite::Result<Service> {
    let type_str: String = row.get(4)?;
    Ok(Service {
        id: row.get(0)?,
        practitioner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        service_type: ServiceType::parse(&type_str).unwrap_or(ServiceType::Session),
        price_cents: row.get(5)?,
        currency: row.get(6)?,
        duration_minutes: row.get(7)?,
        max_participants: row.get(8)?,
        sessions_included: row.get(9)?,
        is_active: row.get::<_, i32>(10)? != 0,
        created_at: parse_ts(&row.get::<_, String>(11)?),
    })
}

pub fn create_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, practitioner_id, name, description, service_type, price_cents, currency, duration_minutes, max_participants, sessions_included, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            service.id,
            service.practitioner_id,
            service.name,
            service.description,
            service.service_type.as_str(),
            service.price_cents,
            service.currency,
            service.duration_minutes,
            service.max_participants,
            service.sessions_included,
            service.is_active as i32,
            ts(&service.created_at),
        ],
    )?;
    Ok(())
}

// soft-deleted services are invisible to every lookup
pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let sql = format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1 AND is_deleted = 0");
    Ok(conn.query_row(&sql, params![id], service_from_row).optional()?)
}

pub fn list_services(
    conn: &Connection,
    practitioner_id: Option<&str>,
    service_type: Option<ServiceType>,
) -> anyhow::Result<Vec<Service>> {
    let sql = format!(
        "SELECT {SERVICE_COLUMNS} FROM services
         WHERE is_deleted = 0 AND is_active = 1
           AND (?1 IS NULL OR practitioner_id = ?1)
           AND (?2 IS NULL OR service_type = ?2)
         ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![practitioner_id, service_type.map(|t| t.as_str())],
        service_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn soft_delete_service(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET is_deleted = 1, is_active = 0 WHERE id = ?1 AND is_deleted = 0",
        params![id],
    )?;
    Ok(count > 0)
}

// ── Service Sessions ──

const SESSION_COLUMNS: &str = "id, service_id, start_time, end_time, max_participants, is_canceled";

fn session_from_row(row: &Row) -> rusqlite::Result<ServiceSession> {
    Ok(ServiceSession {
        id: row.get(0)?,
        service_id: row.get(1)?,
        start_time: parse_ts(&row.get::<_, String>(2)?),
        end_time: parse_ts(&row.get::<_, String>(3)?),
        max_participants: row.get(4)?,
        is_canceled: row.get::<_, i32>(5)? != 0,
    })
}

pub fn create_service_session(conn: &Connection, session: &ServiceSession) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO service_sessions (id, service_id, start_time, end_time, max_participants, is_canceled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session.id,
            session.service_id,
            ts(&session.start_time),
            ts(&session.end_time),
            session.max_participants,
            session.is_canceled as i32,
        ],
    )?;
    Ok(())
}

pub fn get_service_session(
    conn: &Connection,
    id: &str,
) -> anyhow::Result<Option<ServiceSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM service_sessions WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], session_from_row).optional()?)
}

pub fn list_service_sessions(
    conn: &Connection,
    service_id: &str,
) -> anyhow::Result<Vec<ServiceSession>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM service_sessions
         WHERE service_id = ?1 AND is_canceled = 0 ORDER BY start_time ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![service_id], session_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn practitioner_group_sessions_in_range(
    conn: &Connection,
    practitioner_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
) -> anyhow::Result<Vec<ServiceSession>> {
    let mut stmt = conn.prepare(
        "SELECT ss.id, ss.service_id, ss.start_time, ss.end_time, ss.max_participants, ss.is_canceled
         FROM service_sessions ss JOIN services s ON s.id = ss.service_id
         WHERE s.practitioner_id = ?1 AND s.is_deleted = 0 AND ss.is_canceled = 0
           AND ss.start_time < ?3 AND ss.end_time > ?2
         ORDER BY ss.start_time ASC",
    )?;
    let rows = stmt.query_map(
        params![practitioner_id, ts(start), ts(end)],
        session_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_session_seats_taken(conn: &Connection, session_id: &str) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings
         WHERE service_session_id = ?1
           AND status IN ('pending_payment', 'confirmed', 'in_progress', 'completed')",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, client_id, practitioner_id, service_id, service_session_id, parent_booking_id, start_time, end_time, status, payment_status, price_cents, reschedule_count, cancellation_reason, canceled_by, notes, created_at, updated_at";

fn booking_from_row(row: &Row) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: row.get(0)?,
        client_id: row.get(1)?,
        practitioner_id: row.get(2)?,
        service_id: row.get(3)?,
        service_session_id: row.get(4)?,
        parent_booking_id: row.get(5)?,
        start_time: opt_ts(row.get(6)?),
        end_time: opt_ts(row.get(7)?),
        status: BookingStatus::parse(&row.get::<_, String>(8)?),
        payment_status: PaymentStatus::parse(&row.get::<_, String>(9)?),
        price_cents: row.get(10)?,
        reschedule_count: row.get(11)?,
        cancellation_reason: row.get(12)?,
        canceled_by: row.get(13)?,
        notes: row.get(14)?,
        created_at: parse_ts(&row.get::<_, String>(15)?),
        updated_at: parse_ts(&row.get::<_, String>(16)?),
    })
}

fn collect_bookings(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, booking_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn create_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, client_id, practitioner_id, service_id, service_session_id, parent_booking_id, start_time, end_time, status, payment_status, price_cents, reschedule_count, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            booking.id,
            booking.client_id,
            booking.practitioner_id,
            booking.service_id,
            booking.service_session_id,
            booking.parent_booking_id,
            booking.start_time.as_ref().map(ts),
            booking.end_time.as_ref().map(ts),
            booking.status.as_str(),
            booking.payment_status.as_str(),
            booking.price_cents,
            booking.reschedule_count,
            booking.notes,
            ts(&booking.created_at),
            ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], booking_from_row).optional()?)
}

pub fn list_child_bookings(conn: &Connection, parent_id: &str) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE parent_booking_id = ?1 ORDER BY created_at ASC, id ASC"
    );
    collect_bookings(conn, &sql, &[&parent_id])
}

pub fn list_client_bookings(
    conn: &Connection,
    client_id: &str,
    status: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE client_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY COALESCE(start_time, created_at) DESC LIMIT ?3"
    );
    collect_bookings(conn, &sql, &[&client_id, &status, &limit])
}

pub fn list_practitioner_bookings(
    conn: &Connection,
    practitioner_id: &str,
    status: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE practitioner_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY COALESCE(start_time, created_at) DESC LIMIT ?3"
    );
    collect_bookings(conn, &sql, &[&practitioner_id, &status, &limit])
}

pub fn get_practitioner_bookings_in_range(
    conn: &Connection,
    practitioner_id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude_id: Option<&str>,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE practitioner_id = ?1
           AND start_time IS NOT NULL
           AND service_session_id IS NULL
           AND start_time < ?3 AND end_time > ?2
           AND status IN ('pending_payment', 'confirmed', 'in_progress')
           AND (?4 IS NULL OR id != ?4)
         ORDER BY start_time ASC"
    );
    let start = ts(start);
    let end = ts(end);
    collect_bookings(conn, &sql, &[&practitioner_id, &start, &end, &exclude_id])
}

pub fn confirmed_bookings_starting_between(
    conn: &Connection,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status = 'confirmed' AND start_time > ?1 AND start_time <= ?2
         ORDER BY start_time ASC"
    );
    let from = ts(from);
    let to = ts(to);
    collect_bookings(conn, &sql, &[&from, &to])
}

pub fn active_bookings_ended_before(
    conn: &Connection,
    cutoff: &NaiveDateTime,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE status IN ('confirmed', 'in_progress') AND end_time IS NOT NULL AND end_time <= ?1
         ORDER BY end_time ASC"
    );
    let cutoff = ts(cutoff);
    collect_bookings(conn, &sql, &[&cutoff])
}

pub fn confirmed_practitioner_bookings(
    conn: &Connection,
    practitioner_id: &str,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE practitioner_id = ?1 AND start_time IS NOT NULL
           AND status IN ('confirmed', 'in_progress', 'completed')
         ORDER BY start_time ASC"
    );
    collect_bookings(conn, &sql, &[&practitioner_id])
}

pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    status: BookingStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), ts(&now()), id],
    )?;
    Ok(count > 0)
}

pub fn update_payment_status(
    conn: &Connection,
    id: &str,
    status: PaymentStatus,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET payment_status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), ts(&now()), id],
    )?;
    Ok(())
}

pub fn update_booking_times(
    conn: &Connection,
    id: &str,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    count_as_reschedule: bool,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings
         SET start_time = ?1, end_time = ?2,
             reschedule_count = reschedule_count + ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            ts(start),
            ts(end),
            count_as_reschedule as i32,
            ts(&now()),
            id
        ],
    )?;
    Ok(())
}

pub fn clear_booking_times(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings SET start_time = NULL, end_time = NULL, updated_at = ?1 WHERE id = ?2",
        params![ts(&now()), id],
    )?;
    Ok(())
}

pub fn mark_booking_canceled(
    conn: &Connection,
    id: &str,
    reason: Option<&str>,
    canceled_by: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE bookings
         SET status = 'canceled', cancellation_reason = ?1, canceled_by = ?2, updated_at = ?3
         WHERE id = ?4",
        params![reason, canceled_by, ts(&now()), id],
    )?;
    Ok(())
}

// ── Orders ──

pub fn create_order(conn: &Connection, order: &Order) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO orders (id, user_id, booking_id, subtotal_cents, credits_applied_cents, total_cents, currency, status, provider_payment_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            order.id,
            order.user_id,
            order.booking_id,
            order.subtotal_cents,
            order.credits_applied_cents,
            order.total_cents,
            order.currency,
            order.status.as_str(),
            order.provider_payment_id,
            ts(&order.created_at),
        ],
    )?;
    Ok(())
}

pub fn update_order_status(
    conn: &Connection,
    id: &str,
    status: OrderStatus,
    provider_payment_id: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE orders
         SET status = ?1, provider_payment_id = COALESCE(?2, provider_payment_id), updated_at = ?3
         WHERE id = ?4",
        params![status.as_str(), provider_payment_id, ts(&now()), id],
    )?;
    Ok(())
}

// ── Credits ──

pub fn insert_credit_transaction(
    conn: &Connection,
    user_id: &str,
    amount_cents: i64,
    kind: &str,
    booking_id: Option<&str>,
    description: Option<&str>,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO credit_transactions (user_id, amount_cents, kind, booking_id, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, amount_cents, kind, booking_id, description],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn credit_balance(conn: &Connection, user_id: &str) -> anyhow::Result<i64> {
    let balance: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM credit_transactions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(balance)
}

pub fn list_credit_transactions(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<CreditTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, amount_cents, kind, booking_id, description, created_at
         FROM credit_transactions WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(CreditTransaction {
            id: row.get(0)?,
            user_id: row.get(1)?,
            amount_cents: row.get(2)?,
            kind: row.get(3)?,
            booking_id: row.get(4)?,
            description: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Earnings ──

const EARNINGS_COLUMNS: &str = "id, practitioner_id, booking_id, gross_cents, commission_rate_bps, commission_cents, net_cents, status, available_after, payout_id, created_at";

fn earnings_from_row(row: &Row) -> rusqlite::Result<EarningsTransaction> {
    Ok(EarningsTransaction {
        id: row.get(0)?,
        practitioner_id: row.get(1)?,
        booking_id: row.get(2)?,
        gross_cents: row.get(3)?,
        commission_rate_bps: row.get(4)?,
        commission_cents: row.get(5)?,
        net_cents: row.get(6)?,
        status: EarningsStatus::parse(&row.get::<_, String>(7)?),
        available_after: parse_ts(&row.get::<_, String>(8)?),
        payout_id: row.get(9)?,
        created_at: parse_ts(&row.get::<_, String>(10)?),
    })
}

pub fn create_earnings(conn: &Connection, e: &EarningsTransaction) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO earnings_transactions (id, practitioner_id, booking_id, gross_cents, commission_rate_bps, commission_cents, net_cents, status, available_after, payout_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            e.id,
            e.practitioner_id,
            e.booking_id,
            e.gross_cents,
            e.commission_rate_bps,
            e.commission_cents,
            e.net_cents,
            e.status.as_str(),
            ts(&e.available_after),
            e.payout_id,
            ts(&e.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_earnings_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Option<EarningsTransaction>> {
    let sql = format!("SELECT {EARNINGS_COLUMNS} FROM earnings_transactions WHERE booking_id = ?1");
    Ok(conn.query_row(&sql, params![booking_id], earnings_from_row).optional()?)
}

pub fn update_earnings_amounts(
    conn: &Connection,
    id: &str,
    gross_cents: i64,
    commission_cents: i64,
    net_cents: i64,
    status: EarningsStatus,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE earnings_transactions
         SET gross_cents = ?1, commission_cents = ?2, net_cents = ?3, status = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            gross_cents,
            commission_cents,
            net_cents,
            status.as_str(),
            ts(&now()),
            id
        ],
    )?;
    Ok(())
}

pub fn set_earnings_available_after(
    conn: &Connection,
    booking_id: &str,
    available_after: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE earnings_transactions SET available_after = ?1, updated_at = ?2
         WHERE booking_id = ?3 AND status = 'pending'",
        params![ts(available_after), ts(&now()), booking_id],
    )?;
    Ok(())
}

// released once delivered, no-show, cancelled with a share left, or a confirmed package
pub fn release_available_earnings(conn: &Connection, as_of: &NaiveDateTime) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE earnings_transactions
         SET status = 'available', updated_at = ?1
         WHERE status = 'pending' AND available_after <= ?1
           AND booking_id IN (
               SELECT id FROM bookings
               WHERE status IN ('completed', 'no_show', 'canceled')
                  OR (status = 'confirmed' AND start_time IS NULL)
           )",
        params![ts(as_of)],
    )?;
    Ok(count)
}

pub fn earnings_balance(conn: &Connection, practitioner_id: &str) -> anyhow::Result<EarningsBalance> {
    let balance = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'pending' THEN net_cents END), 0),
            COALESCE(SUM(CASE WHEN status = 'available' AND payout_id IS NULL THEN net_cents END), 0),
            COALESCE(SUM(CASE WHEN status = 'paid' THEN net_cents END), 0),
            COALESCE(SUM(CASE WHEN status != 'canceled' THEN net_cents END), 0)
         FROM earnings_transactions WHERE practitioner_id = ?1",
        params![practitioner_id],
        |row| {
            Ok(EarningsBalance {
                pending_cents: row.get(0)?,
                available_cents: row.get(1)?,
                paid_cents: row.get(2)?,
                lifetime_cents: row.get(3)?,
            })
        },
    )?;
    Ok(balance)
}

pub fn list_earnings(
    conn: &Connection,
    practitioner_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<EarningsTransaction>> {
    let sql = format!(
        "SELECT {EARNINGS_COLUMNS} FROM earnings_transactions
         WHERE practitioner_id = ?1 ORDER BY created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![practitioner_id, limit], earnings_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn attach_available_earnings(
    conn: &Connection,
    practitioner_id: &str,
    payout_id: &str,
) -> anyhow::Result<i64> {
    conn.execute(
        "UPDATE earnings_transactions SET payout_id = ?1, updated_at = ?2
         WHERE practitioner_id = ?3 AND status = 'available' AND payout_id IS NULL",
        params![payout_id, ts(&now()), practitioner_id],
    )?;
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(net_cents), 0) FROM earnings_transactions WHERE payout_id = ?1",
        params![payout_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn mark_payout_earnings_paid(conn: &Connection, payout_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE earnings_transactions SET status = 'paid', updated_at = ?1
         WHERE payout_id = ?2 AND status = 'available'",
        params![ts(&now()), payout_id],
    )?;
    Ok(count)
}

pub fn detach_payout_earnings(conn: &Connection, payout_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE earnings_transactions SET payout_id = NULL, updated_at = ?1
         WHERE payout_id = ?2 AND status = 'available'",
        params![ts(&now()), payout_id],
    )?;
    Ok(count)
}

// ── Payouts ──

const PAYOUT_COLUMNS: &str = "id, practitioner_id, amount_cents, currency, status, provider_transfer_id, failure_reason, created_at, completed_at";

fn payout_from_row(row: &Row) -> rusqlite::Result<Payout> {
    Ok(Payout {
        id: row.get(0)?,
        practitioner_id: row.get(1)?,
        amount_cents: row.get(2)?,
        currency: row.get(3)?,
        status: PayoutStatus::parse(&row.get::<_, String>(4)?),
        provider_transfer_id: row.get(5)?,
        failure_reason: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
        completed_at: opt_ts(row.get(8)?),
    })
}

pub fn create_payout(conn: &Connection, payout: &Payout) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payouts (id, practitioner_id, amount_cents, currency, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            payout.id,
            payout.practitioner_id,
            payout.amount_cents,
            payout.currency,
            payout.status.as_str(),
            ts(&payout.created_at),
        ],
    )?;
    Ok(())
}

pub fn finish_payout(
    conn: &Connection,
    id: &str,
    status: PayoutStatus,
    transfer_id: Option<&str>,
    failure_reason: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE payouts SET status = ?1, provider_transfer_id = ?2, failure_reason = ?3, completed_at = ?4
         WHERE id = ?5",
        params![status.as_str(), transfer_id, failure_reason, ts(&now()), id],
    )?;
    Ok(())
}

pub fn list_payouts(
    conn: &Connection,
    practitioner_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<Payout>> {
    let sql = format!(
        "SELECT {PAYOUT_COLUMNS} FROM payouts WHERE practitioner_id = ?1
         ORDER BY created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![practitioner_id, limit], payout_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn has_processing_payout(conn: &Connection, practitioner_id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM payouts WHERE practitioner_id = ?1 AND status = 'processing'",
        params![practitioner_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ── Notifications ──

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, body, booking_id, is_read, created_at";

fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        booking_id: row.get(5)?,
        is_read: row.get::<_, i32>(6)? != 0,
        created_at: row.get(7)?,
    })
}

pub fn insert_notification(
    conn: &Connection,
    user_id: &str,
    kind: &str,
    title: &str,
    body: &str,
    booking_id: Option<&str>,
    dedupe_key: Option<&str>,
) -> anyhow::Result<Option<Notification>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO notifications (user_id, kind, title, body, booking_id, dedupe_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, kind, title, body, booking_id, dedupe_key],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    let id = conn.last_insert_rowid();
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    Ok(Some(conn.query_row(&sql, params![id], notification_from_row)?))
}

pub fn mark_notification_delivered(conn: &Connection, id: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE notifications SET delivered_at = ?1 WHERE id = ?2",
        params![ts(&now()), id],
    )?;
    Ok(())
}

pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    unread_only: bool,
    limit: i64,
) -> anyhow::Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
         ORDER BY id DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id, unread_only as i32, limit],
        notification_from_row,
    )?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn notifications_since(
    conn: &Connection,
    user_id: &str,
    since_id: i64,
) -> anyhow::Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE user_id = ?1 AND id > ?2 ORDER BY id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, since_id], notification_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn mark_notification_read(conn: &Connection, user_id: &str, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    Ok(count > 0)
}

pub fn mark_all_notifications_read(conn: &Connection, user_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
    )?;
    Ok(count)
}

// ── Conversations ──

// one row per pair, stored ordered
pub fn get_or_create_conversation(
    conn: &Connection,
    user_x: &str,
    user_y: &str,
) -> anyhow::Result<String> {
    let (user_a, user_b) = if user_x < user_y {
        (user_x, user_y)
    } else {
        (user_y, user_x)
    };
    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, user_a, user_b) VALUES (?1, ?2, ?3)",
        params![uuid::Uuid::new_v4().to_string(), user_a, user_b],
    )?;
    let id: String = conn.query_row(
        "SELECT id FROM conversations WHERE user_a = ?1 AND user_b = ?2",
        params![user_a, user_b],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_conversation_participants(
    conn: &Connection,
    id: &str,
) -> anyhow::Result<Option<(String, String)>> {
    Ok(conn
        .query_row(
            "SELECT user_a, user_b FROM conversations WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

pub fn list_conversations(
    conn: &Connection,
    user_id: &str,
) -> anyhow::Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare(
        "SELECT c.id,
                CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END AS other_id,
                u.full_name,
                (SELECT body FROM messages m WHERE m.conversation_id = c.id ORDER BY m.id DESC LIMIT 1),
                COALESCE((SELECT MAX(created_at) FROM messages m WHERE m.conversation_id = c.id), c.created_at) AS last_activity,
                (SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = c.id AND m.sender_id != ?1 AND m.is_read = 0)
         FROM conversations c
         JOIN users u ON u.id = CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END
         WHERE c.user_a = ?1 OR c.user_b = ?1
         ORDER BY last_activity DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(ConversationSummary {
            id: row.get(0)?,
            other_user_id: row.get(1)?,
            other_user_name: row.get(2)?,
            last_message: row.get(3)?,
            last_activity: row.get(4)?,
            unread_count: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    sender_id: &str,
    recipient_id: &str,
    body: &str,
) -> anyhow::Result<ChatMessage> {
    conn.execute(
        "INSERT INTO messages (conversation_id, sender_id, body) VALUES (?1, ?2, ?3)",
        params![conversation_id, sender_id, body],
    )?;
    let id = conn.last_insert_rowid();
    let created_at: String = conn.query_row(
        "SELECT created_at FROM messages WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(ChatMessage {
        id,
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        recipient_id: recipient_id.to_string(),
        body: body.to_string(),
        is_read: false,
        created_at,
    })
}

pub fn list_messages(
    conn: &Connection,
    conversation_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.sender_id,
                CASE WHEN c.user_a = m.sender_id THEN c.user_b ELSE c.user_a END,
                m.body, m.is_read, m.created_at
         FROM messages m JOIN conversations c ON c.id = m.conversation_id
         WHERE m.conversation_id = ?1
         ORDER BY m.id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![conversation_id, limit], |row| {
        Ok(ChatMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            recipient_id: row.get(3)?,
            body: row.get(4)?,
            is_read: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
        })
    })?;
    let mut messages = rows.collect::<Result<Vec<_>, _>>()?;
    messages.reverse();
    Ok(messages)
}

pub fn mark_conversation_read(
    conn: &Connection,
    conversation_id: &str,
    reader_id: &str,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE messages SET is_read = 1
         WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
        params![conversation_id, reader_id],
    )?;
    Ok(count)
}

// ── Rooms ──

pub fn get_room(conn: &Connection, subject_id: &str) -> anyhow::Result<Option<Room>> {
    Ok(conn
        .query_row(
            "SELECT id, subject_id, provider_room_name, url, created_at FROM rooms WHERE subject_id = ?1",
            params![subject_id],
            |row| {
                Ok(Room {
                    id: row.get(0)?,
                    subject_id: row.get(1)?,
                    provider_room_name: row.get(2)?,
                    url: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?)
}

pub fn create_room(
    conn: &Connection,
    subject_id: &str,
    provider_room_name: &str,
    url: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO rooms (id, subject_id, provider_room_name, url) VALUES (?1, ?2, ?3, ?4)",
        params![
            uuid::Uuid::new_v4().to_string(),
            subject_id,
            provider_room_name,
            url
        ],
    )?;
    Ok(())
}

// ── Workflow Runs ──

pub fn start_workflow_run(conn: &Connection, kind: &str, subject_id: &str) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO workflow_runs (id, kind, subject_id) VALUES (?1, ?2, ?3)",
        params![id, kind, subject_id],
    )?;
    Ok(id)
}

pub fn finish_workflow_run(
    conn: &Connection,
    id: &str,
    succeeded: bool,
    attempts: i64,
    last_error: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE workflow_runs SET status = ?1, attempts = ?2, last_error = ?3, finished_at = datetime('now')
         WHERE id = ?4",
        params![
            if succeeded { "completed" } else { "failed" },
            attempts,
            last_error,
            id
        ],
    )?;
    Ok(())
}

pub fn list_workflow_runs(conn: &Connection, subject_id: &str) -> anyhow::Result<Vec<WorkflowRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, subject_id, status, attempts, last_error, started_at, finished_at
         FROM workflow_runs WHERE subject_id = ?1 ORDER BY started_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![subject_id], |row| {
        Ok(WorkflowRun {
            id: row.get(0)?,
            kind: row.get(1)?,
            subject_id: row.get(2)?,
            status: row.get(3)?,
            attempts: row.get(4)?,
            last_error: row.get(5)?,
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
