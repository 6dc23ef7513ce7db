use std::{str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    Sqlite, SqliteConnection, SqlitePool, Transaction,
};

use crate::{
    errors::AppError,
    structs::{Customer, CustomerData, User, UserData},
    utils, AppState,
};

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    last_name VARCHAR(100) NOT NULL,
    first_name VARCHAR(100) NOT NULL,
    middle_name VARCHAR(100),
    phone_number VARCHAR(20),
    email VARCHAR(100),
    address TEXT,
    remark TEXT,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL
)
"#;

const CREATE_CUSTOMERS: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY,
    customer_name VARCHAR(100) NOT NULL,
    phone_number VARCHAR(20),
    email VARCHAR(100),
    address TEXT,
    state VARCHAR(50),
    purchase_date DATETIME NOT NULL,
    gold_type VARCHAR(50),
    gold_quality VARCHAR(50),
    gold_weight FLOAT NOT NULL DEFAULT 0,
    price_per_gram FLOAT NOT NULL DEFAULT 0,
    total_amount FLOAT NOT NULL DEFAULT 0,
    discount_percentage FLOAT NOT NULL DEFAULT 0,
    discount_amount FLOAT NOT NULL DEFAULT 0,
    final_amount FLOAT NOT NULL DEFAULT 0,
    payment_mode VARCHAR(50),
    notes TEXT
)
"#;

/// Opens (creating if needed) the database file and makes sure both tables
/// exist. Safe to call against an existing database.
pub async fn initialize(database_url: &str) -> Result<AppState, AppError> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .read_only(false)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts).await?;
    ensure_schema(&db_pool).await?;
    log::info!("Database ready at {}", database_url);
    Ok(AppState { db_pool })
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query(CREATE_USERS).execute(&mut *tx).await?;
    sqlx::query(CREATE_CUSTOMERS).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn close(state: &AppState) {
    state.db_pool.close().await;
    log::info!("Database connections closed");
}

/// Starts a unit of work. Dropping the transaction without committing rolls
/// it back and hands the connection back to the pool.
pub async fn open_session(state: &AppState) -> Result<Transaction<'static, Sqlite>, AppError> {
    Ok(state.db_pool.begin().await?)
}

pub async fn get_all_customers(state: &AppState) -> Result<Vec<Customer>, AppError> {
    let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers ORDER BY id")
        .fetch_all(&state.db_pool)
        .await?;
    log::debug!("Loaded {} customers", customers.len());
    Ok(customers)
}

pub async fn get_customer_by_id(state: &AppState, id: i64) -> Result<Customer, AppError> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or(AppError::NotFound)
}

/// Case-insensitive substring match on name, phone and email.
pub async fn search_customers(state: &AppState, query: &str) -> Result<Vec<Customer>, AppError> {
    let needle = query.trim().to_lowercase();
    let customers = get_all_customers(state).await?;
    if needle.is_empty() {
        return Ok(customers);
    }
    Ok(customers
        .into_iter()
        .filter(|customer| customer.matches(&needle))
        .collect())
}

/// Inserts without validating or committing; the caller owns the unit of
/// work.
pub async fn insert_customer(
    conn: &mut SqliteConnection,
    data: &CustomerData,
) -> Result<Customer, sqlx::Error> {
    sqlx::query_as::<_, Customer>(
        "INSERT INTO customers (customer_name, phone_number, email, address, state, purchase_date, gold_type, gold_quality, gold_weight, price_per_gram, total_amount, discount_percentage, discount_amount, final_amount, payment_mode, notes) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) RETURNING *",
    )
    .bind(&data.customer_name)
    .bind(&data.phone_number)
    .bind(&data.email)
    .bind(&data.address)
    .bind(&data.state)
    .bind(data.purchase_date)
    .bind(&data.gold_type)
    .bind(&data.gold_quality)
    .bind(data.gold_weight)
    .bind(data.price_per_gram)
    .bind(data.total_amount)
    .bind(data.discount_percentage)
    .bind(data.discount_amount)
    .bind(data.final_amount)
    .bind(&data.payment_mode)
    .bind(&data.notes)
    .fetch_one(&mut *conn)
    .await
}

pub async fn create_customer(state: &AppState, data: &CustomerData) -> Result<Customer, AppError> {
    data.validate()?;
    let mut tx = open_session(state).await?;
    let customer = insert_customer(&mut tx, data).await?;
    tx.commit().await?;
    log::info!("Customer created: {} ({})", customer.id, customer.customer_name);
    Ok(customer)
}

pub async fn update_customer(
    state: &AppState,
    id: i64,
    data: &CustomerData,
) -> Result<Customer, AppError> {
    data.validate()?;
    let mut tx = open_session(state).await?;
    let customer = sqlx::query_as::<_, Customer>(
        "UPDATE customers SET customer_name = $1, phone_number = $2, email = $3, address = $4, state = $5, purchase_date = $6, gold_type = $7, gold_quality = $8, gold_weight = $9, price_per_gram = $10, total_amount = $11, discount_percentage = $12, discount_amount = $13, final_amount = $14, payment_mode = $15, notes = $16 WHERE id = $17 RETURNING *",
    )
    .bind(&data.customer_name)
    .bind(&data.phone_number)
    .bind(&data.email)
    .bind(&data.address)
    .bind(&data.state)
    .bind(data.purchase_date)
    .bind(&data.gold_type)
    .bind(&data.gold_quality)
    .bind(data.gold_weight)
    .bind(data.price_per_gram)
    .bind(data.total_amount)
    .bind(data.discount_percentage)
    .bind(data.discount_amount)
    .bind(data.final_amount)
    .bind(&data.payment_mode)
    .bind(&data.notes)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound)?;
    tx.commit().await?;
    log::info!("Customer updated: {}", customer.id);
    Ok(customer)
}

pub async fn delete_customer(state: &AppState, id: i64) -> Result<(), AppError> {
    let mut tx = open_session(state).await?;
    let result = sqlx::query("DELETE FROM customers WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    tx.commit().await?;
    log::info!("Customer with id {} deleted", id);
    Ok(())
}

pub async fn get_all_users(state: &AppState) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(&state.db_pool)
        .await?;
    Ok(users)
}

pub async fn get_user_by_id(state: &AppState, id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn create_user(state: &AppState, data: &UserData) -> Result<User, AppError> {
    data.validate()?;
    let created_at = utils::now();
    let mut tx = open_session(state).await?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (last_name, first_name, middle_name, phone_number, email, address, remark, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
    )
    .bind(&data.last_name)
    .bind(&data.first_name)
    .bind(&data.middle_name)
    .bind(&data.phone_number)
    .bind(&data.email)
    .bind(&data.address)
    .bind(&data.remark)
    .bind(created_at)
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    log::info!("User created: {} ({} {})", user.id, user.first_name, user.last_name);
    Ok(user)
}

pub async fn update_user(state: &AppState, id: i64, data: &UserData) -> Result<User, AppError> {
    data.validate()?;
    let mut tx = open_session(state).await?;
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET last_name = $1, first_name = $2, middle_name = $3, phone_number = $4, email = $5, address = $6, remark = $7, updated_at = $8 WHERE id = $9 RETURNING *",
    )
    .bind(&data.last_name)
    .bind(&data.first_name)
    .bind(&data.middle_name)
    .bind(&data.phone_number)
    .bind(&data.email)
    .bind(&data.address)
    .bind(&data.remark)
    .bind(utils::now())
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound)?;
    tx.commit().await?;
    log::info!("User updated: {}", user.id);
    Ok(user)
}

pub async fn delete_user(state: &AppState, id: i64) -> Result<(), AppError> {
    let mut tx = open_session(state).await?;
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    tx.commit().await?;
    log::info!("User with id {} deleted", id);
    Ok(())
}

/// Single-connection in-memory database; every connection to
/// `sqlite::memory:` would otherwise see its own empty database.
#[cfg(test)]
pub async fn test_state() -> AppState {
    use sqlx::sqlite::SqlitePoolOptions;

    let opts = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .unwrap();
    ensure_schema(&db_pool).await.unwrap();
    AppState { db_pool }
}

#[cfg(test)]
pub async fn count_customers(state: &AppState) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers")
        .fetch_one(&state.db_pool)
        .await
        .unwrap()
}
