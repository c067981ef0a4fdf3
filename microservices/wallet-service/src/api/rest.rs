//! Wallet REST API

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::extract::{AppJson, AppPath, AppQuery};
use crate::admin::AdminGate;
use crate::auth::{AuthService, AuthenticatedCaller};
use crate::error::Result;
use crate::identity::{IdentityService, PasswordReset, ReferralProgram, Registration};
use crate::investment::InvestmentEngine;
use crate::ledger::LedgerStore;
use crate::metrics::WalletMetrics;
use crate::rates::RateBook;
use crate::types::{Account, InvestmentPlan, Pagination, User, WithdrawalDestination};
use crate::workflow::TransactionWorkflow;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub identity: IdentityService,
    pub referrals: ReferralProgram,
    pub ledger: LedgerStore,
    pub workflow: TransactionWorkflow,
    pub investments: InvestmentEngine,
    pub gate: AdminGate,
    pub rates: RateBook,
    pub metrics: WalletMetrics,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Auth
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/forgot-password", post(forgot_password))
        .route("/api/reset-password/{token}", post(reset_password))
        // Wallet
        .route("/api/wallet", get(get_wallet))
        .route("/api/wallet/deposit", post(deposit))
        .route("/api/wallet/withdraw", post(withdraw))
        .route("/api/wallet/transactions", get(list_transactions))
        // Investments
        .route("/api/investment/plans", get(list_plans))
        .route("/api/investment/invest", post(invest))
        .route("/api/investment/my-investments", get(my_investments))
        // Referrals and rates
        .route("/api/referrals", get(referrals))
        .route("/api/rates", get(rates))
        // Admin
        .route("/api/admin/users", get(admin_users))
        .route("/api/admin/users/{id}", delete(admin_delete_user))
        .route("/api/admin/wallets", get(admin_wallets))
        .route("/api/admin/wallets/debit", post(admin_debit))
        .route("/api/admin/wallets/{user_id}/freeze", post(admin_freeze))
        .route("/api/admin/topup", post(admin_top_up))
        .route("/api/admin/pending-deposits", get(admin_pending_deposits))
        .route("/api/admin/pending-withdrawals", get(admin_pending_withdrawals))
        .route("/api/admin/approve-deposit/{id}", post(admin_approve_deposit))
        .route("/api/admin/disapprove-deposit/{id}", post(admin_disapprove_deposit))
        .route("/api/admin/approve-withdrawal/{id}", post(admin_approve_withdrawal))
        .route("/api/admin/disapprove-withdrawal/{id}", post(admin_disapprove_withdrawal))
        .route("/api/admin/investments/{id}/cancel", post(admin_cancel_investment))
        .route("/api/admin/maturation/run", post(admin_run_maturation))
        .route("/api/admin/stats", get(admin_stats))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "wallet-service" }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let journal = state.ledger.journal();
    let available = journal.is_healthy().await;
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": available,
            "dependencies": [{ "name": journal.backend(), "available": available }]
        })),
    )
}

// Auth endpoints

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    id: Uuid,
    name: String,
    email: String,
    role: zentra_core::Role,
    referral_code: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            referral_code: user.referral_code,
        }
    }
}

async fn register(
    State(state): State<AppState>,
    AppJson(form): AppJson<Registration>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = state.identity.register(form).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registration successful",
            "user": UserProfile::from(user),
        })),
    ))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(State(state): State<AppState>, AppJson(req): AppJson<LoginRequest>) -> Result<Json<Value>> {
    let (token, user) = state.identity.login(&req.email, &req.password).await?;
    Ok(Json(json!({
        "token": token,
        "user": UserProfile::from(user),
    })))
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

async fn forgot_password(
    State(state): State<AppState>,
    AppJson(req): AppJson<ForgotPasswordRequest>,
) -> Result<Json<Value>> {
    state.identity.forgot_password(&req.email).await?;
    Ok(Json(json!({
        "message": "If that email is registered, a reset link has been sent"
    })))
}

async fn reset_password(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
    AppJson(form): AppJson<PasswordReset>,
) -> Result<Json<Value>> {
    state.identity.reset_password(&token, form).await?;
    Ok(Json(json!({ "message": "Password has been reset" })))
}

// Wallet endpoints

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletSummary {
    account_id: Uuid,
    balance: Decimal,
    available_balance: Decimal,
    reserved_balance: Decimal,
    frozen: bool,
    updated_at: chrono::DateTime<chrono::Utc>,
    btc_rate: Option<Decimal>,
}

fn wallet_summary(state: &AppState, account: Account) -> WalletSummary {
    WalletSummary {
        account_id: account.account_id,
        balance: account.balance,
        available_balance: account.available(),
        reserved_balance: account.reserved,
        frozen: account.frozen,
        updated_at: account.updated_at,
        btc_rate: state.rates.quote("BTC").map(|q| q.usd),
    }
}

async fn get_wallet(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<WalletSummary>> {
    let account = state.ledger.account(caller.account_id).await?;
    Ok(Json(wallet_summary(&state, account)))
}

#[derive(Deserialize)]
struct DepositRequest {
    amount: Decimal,
    #[serde(default)]
    description: Option<String>,
}

async fn deposit(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppJson(req): AppJson<DepositRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let outcome = state
        .workflow
        .request_deposit(caller.account_id, req.amount, req.description)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Deposit request submitted and awaiting approval",
            "transaction": outcome.entry,
            "wallet": wallet_summary(&state, outcome.account),
        })),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawRequest {
    amount: Decimal,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    coin: Option<String>,
    #[serde(default)]
    wallet_address: Option<String>,
}

async fn withdraw(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppJson(req): AppJson<WithdrawRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let destination = req.payment_method.map(|payment_method| WithdrawalDestination {
        payment_method,
        coin: req.coin,
        wallet_address: req.wallet_address,
    });
    let outcome = state
        .workflow
        .request_withdrawal(caller.account_id, req.amount, req.description, destination)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Withdrawal request submitted and awaiting approval",
            "transaction": outcome.entry,
            "wallet": wallet_summary(&state, outcome.account),
        })),
    ))
}

#[derive(Deserialize)]
struct TransactionsQuery {
    limit: Option<usize>,
    before: Option<u64>,
}

async fn list_transactions(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppQuery(query): AppQuery<TransactionsQuery>,
) -> Result<Json<Value>> {
    let page = state
        .ledger
        .list_entries(
            caller.account_id,
            Pagination {
                limit: query.limit,
                before: query.before,
            },
        )
        .await?;
    Ok(Json(json!({
        "transactions": page.items,
        "nextCursor": page.next_cursor,
    })))
}

// Investment endpoints

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanView<'a> {
    id: &'a str,
    #[serde(flatten)]
    plan: &'a InvestmentPlan,
    daily_return: Decimal,
    duration: u32,
}

async fn list_plans(State(state): State<AppState>) -> Json<Value> {
    let plans: Vec<PlanView<'_>> = state
        .investments
        .plans()
        .iter()
        .map(|plan| PlanView {
            id: &plan.plan_id,
            plan,
            daily_return: plan.daily_return_rate,
            duration: plan.duration_days,
        })
        .collect();
    Json(json!(plans))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvestRequest {
    #[serde(alias = "plan")]
    plan_id: String,
    amount: Decimal,
}

async fn invest(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppJson(req): AppJson<InvestRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let outcome = state
        .investments
        .invest(caller.account_id, &req.plan_id, req.amount)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Investment created successfully",
            "investment": outcome.investment,
            "wallet": wallet_summary(&state, outcome.account),
        })),
    ))
}

async fn my_investments(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let investments = state.investments.list_investments(caller.account_id).await?;
    Ok(Json(json!(investments)))
}

// Referrals and rates

async fn referrals(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let summary = state.referrals.summary(caller.account_id).await?;
    Ok(Json(json!(summary)))
}

async fn rates(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.rates.all()))
}

// Admin endpoints

async fn admin_users(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let users = state.gate.list_users(&caller).await?;
    Ok(Json(json!(users)))
}

async fn admin_delete_user(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>> {
    state.gate.delete_account(&caller, id).await?;
    Ok(Json(json!({ "message": "User and wallet deleted" })))
}

async fn admin_wallets(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let accounts = state.gate.list_accounts(&caller).await?;
    Ok(Json(json!(accounts)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustmentRequest {
    user_id: Uuid,
    amount: Decimal,
    #[serde(default)]
    description: Option<String>,
}

async fn admin_top_up(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppJson(req): AppJson<AdjustmentRequest>,
) -> Result<Json<Value>> {
    let outcome = state
        .gate
        .top_up(&caller, req.user_id, req.amount, req.description)
        .await?;
    Ok(Json(json!({
        "message": "Wallet topped up",
        "transaction": outcome.entry,
        "wallet": wallet_summary(&state, outcome.account),
    })))
}

async fn admin_debit(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppJson(req): AppJson<AdjustmentRequest>,
) -> Result<Json<Value>> {
    let outcome = state
        .gate
        .debit(&caller, req.user_id, req.amount, req.description)
        .await?;
    Ok(Json(json!({
        "message": "Wallet debited",
        "transaction": outcome.entry,
        "wallet": wallet_summary(&state, outcome.account),
    })))
}

#[derive(Deserialize)]
struct FreezeRequest {
    freeze: bool,
}

async fn admin_freeze(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(user_id): AppPath<Uuid>,
    AppJson(req): AppJson<FreezeRequest>,
) -> Result<Json<Value>> {
    let account = state.gate.set_frozen(&caller, user_id, req.freeze).await?;
    let message = if account.frozen {
        "Wallet frozen"
    } else {
        "Wallet unfrozen"
    };
    Ok(Json(json!({
        "message": message,
        "wallet": wallet_summary(&state, account),
    })))
}

async fn admin_pending_deposits(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let pending = state.gate.list_pending_deposits(&caller).await?;
    Ok(Json(json!(pending)))
}

async fn admin_pending_withdrawals(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let pending = state.gate.list_pending_withdrawals(&caller).await?;
    Ok(Json(json!(pending)))
}

async fn admin_approve_deposit(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>> {
    let outcome = state.gate.approve_deposit(&caller, id).await?;
    Ok(Json(json!({ "message": "Deposit approved", "transaction": outcome.entry })))
}

async fn admin_disapprove_deposit(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>> {
    let outcome = state.gate.disapprove_deposit(&caller, id).await?;
    Ok(Json(json!({ "message": "Deposit disapproved", "transaction": outcome.entry })))
}

async fn admin_approve_withdrawal(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>> {
    let outcome = state.gate.approve_withdrawal(&caller, id).await?;
    Ok(Json(json!({ "message": "Withdrawal approved", "transaction": outcome.entry })))
}

async fn admin_disapprove_withdrawal(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>> {
    let outcome = state.gate.disapprove_withdrawal(&caller, id).await?;
    Ok(Json(json!({ "message": "Withdrawal disapproved", "transaction": outcome.entry })))
}

async fn admin_cancel_investment(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Value>> {
    let outcome = state.gate.cancel_investment(&caller, id).await?;
    Ok(Json(json!({
        "message": "Investment cancelled and principal refunded",
        "investment": outcome.investment,
        "wallet": wallet_summary(&state, outcome.account),
    })))
}

async fn admin_run_maturation(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let report = state.gate.run_maturation(&caller).await?;
    Ok(Json(json!(report)))
}

async fn admin_stats(
    State(state): State<AppState>,
    AuthenticatedCaller(caller): AuthenticatedCaller,
) -> Result<Json<Value>> {
    let stats = state.gate.stats(&caller).await?;
    Ok(Json(json!(stats)))
}
