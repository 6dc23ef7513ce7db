use std::collections::HashMap;

use actix_web::{
    delete, get,
    http::StatusCode,
    post, put,
    web::{self, Bytes, Data, Json},
    HttpResponse, Responder, ResponseError,
};
use serde::Serialize;
use tera::{Context, Value};

use crate::{
    amounts::{format_money, format_weight},
    db,
    errors::AppError,
    import::{self, ImportFormat},
    structs::{
        Customer, CustomerData, CustomerForm, SearchQuery, UserData, GOLD_QUALITIES, GOLD_TYPES,
        PAYMENT_MODES,
    },
    utils, AppState, TEMPLATES,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index_handler)
        .service(new_customer_handler)
        .service(create_customer_form_handler)
        .service(edit_customer_handler)
        .service(update_customer_form_handler)
        .service(delete_customer_form_handler)
        .service(list_customers_api)
        .service(get_customer_api)
        .service(create_customer_api)
        .service(update_customer_api)
        .service(delete_customer_api)
        .service(import_form_handler)
        .service(import_api)
        .service(list_users_api)
        .service(get_user_api)
        .service(create_user_api)
        .service(update_user_api)
        .service(delete_user_api);
}

/// Tera filter: number with two decimals.
pub fn money_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let number = value
        .as_f64()
        .ok_or_else(|| tera::Error::msg("money filter expects a number"))?;
    Ok(Value::String(format_money(number)))
}

/// Tera filter: number with three decimals.
pub fn weight_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let number = value
        .as_f64()
        .ok_or_else(|| tera::Error::msg("weight filter expects a number"))?;
    Ok(Value::String(format_weight(number)))
}

/// Prefilled values for the add/edit form.
#[derive(Serialize, Debug)]
struct FormValues {
    customer_name: String,
    phone_number: String,
    email: String,
    address: String,
    state: String,
    purchase_date: String,
    gold_type: String,
    gold_quality: String,
    gold_weight: String,
    price_per_gram: String,
    discount_percentage: String,
    payment_mode: String,
    notes: String,
}

impl FormValues {
    fn blank() -> Self {
        FormValues {
            customer_name: String::new(),
            phone_number: String::new(),
            email: String::new(),
            address: String::new(),
            state: String::new(),
            purchase_date: utils::now().format("%Y-%m-%d").to_string(),
            gold_type: GOLD_TYPES[0].to_string(),
            gold_quality: GOLD_QUALITIES[0].to_string(),
            gold_weight: format_weight(0.0),
            price_per_gram: format_money(0.0),
            discount_percentage: format_money(0.0),
            payment_mode: PAYMENT_MODES[0].to_string(),
            notes: String::new(),
        }
    }
}

impl From<&Customer> for FormValues {
    fn from(customer: &Customer) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        FormValues {
            customer_name: customer.customer_name.clone(),
            phone_number: text(&customer.phone_number),
            email: text(&customer.email),
            address: text(&customer.address),
            state: text(&customer.state),
            purchase_date: customer.purchase_date.format("%Y-%m-%d").to_string(),
            gold_type: text(&customer.gold_type),
            gold_quality: text(&customer.gold_quality),
            gold_weight: format_weight(customer.gold_weight),
            price_per_gram: format_money(customer.price_per_gram),
            discount_percentage: format_money(customer.discount_percentage),
            payment_mode: text(&customer.payment_mode),
            notes: text(&customer.notes),
        }
    }
}

fn render(template: &str, context: &Context) -> Result<HttpResponse, AppError> {
    render_with_status(template, context, StatusCode::OK)
}

fn render_with_status(
    template: &str,
    context: &Context,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let rendered = TEMPLATES.render(template, context).map_err(|e| {
        log::error!("Failed to render template: {}", e);
        AppError::TemplateError(e)
    })?;

    Ok(HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(rendered))
}

fn render_form(title: &str, action: &str, values: FormValues) -> Result<HttpResponse, AppError> {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("action", action);
    context.insert("form", &values);
    context.insert("gold_types", &GOLD_TYPES);
    context.insert("gold_qualities", &GOLD_QUALITIES);
    context.insert("payment_modes", &PAYMENT_MODES);
    render("customer_form.html", &context)
}

fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header(("Location", location))
        .finish()
}

#[get("/")]
pub async fn index_handler(
    state: Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<impl Responder, AppError> {
    let customers = db::search_customers(&state, &query.q).await.map_err(|e| {
        log::error!("Failed to load customers: {}", e);
        e
    })?;

    let mut context = Context::new();
    context.insert("title", "Gold Purchase Management");
    context.insert("customers", &customers);
    context.insert("q", &query.q);
    context.insert("version", env!("CARGO_PKG_VERSION"));
    render("index.html", &context)
}

#[get("/customers/new")]
pub async fn new_customer_handler() -> Result<impl Responder, AppError> {
    render_form("Add Customer", "/customers", FormValues::blank())
}

#[post("/customers")]
pub async fn create_customer_form_handler(
    web::Form(form): web::Form<CustomerForm>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let data = form.into_data()?;
    db::create_customer(&state, &data).await?;
    Ok(see_other("/"))
}

#[get("/customers/{id}/edit")]
pub async fn edit_customer_handler(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let id = path.into_inner();
    let customer = db::get_customer_by_id(&state, id).await?;
    render_form(
        "Update Customer",
        &format!("/customers/{}", id),
        FormValues::from(&customer),
    )
}

#[post("/customers/{id}")]
pub async fn update_customer_form_handler(
    path: web::Path<i64>,
    web::Form(form): web::Form<CustomerForm>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let data = form.into_data()?;
    db::update_customer(&state, path.into_inner(), &data).await?;
    Ok(see_other("/"))
}

#[post("/customers/{id}/delete")]
pub async fn delete_customer_form_handler(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_customer(&state, path.into_inner()).await?;
    Ok(see_other("/"))
}

#[get("/api/customers")]
pub async fn list_customers_api(
    state: Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<impl Responder, AppError> {
    Ok(Json(db::search_customers(&state, &query.q).await?))
}

#[get("/api/customers/{id}")]
pub async fn get_customer_api(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    Ok(Json(db::get_customer_by_id(&state, path.into_inner()).await?))
}

#[post("/api/customers")]
pub async fn create_customer_api(
    Json(data): Json<CustomerData>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let customer = db::create_customer(&state, &data).await?;
    Ok(HttpResponse::Created().json(customer))
}

#[put("/api/customers/{id}")]
pub async fn update_customer_api(
    path: web::Path<i64>,
    Json(data): Json<CustomerData>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    Ok(Json(
        db::update_customer(&state, path.into_inner(), &data).await?,
    ))
}

#[delete("/api/customers/{id}")]
pub async fn delete_customer_api(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_customer(&state, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Upload from the index page; the body is the raw CSV or workbook file.
#[post("/import")]
pub async fn import_form_handler(
    body: Bytes,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let format = ImportFormat::sniff(&body);
    let (lines, status) = match import::import_bytes(&state, format, body.to_vec()).await {
        Ok(report) => (report.summary(), StatusCode::OK),
        Err(e) => {
            log::error!("Failed to import file: {}", e);
            (vec![format!("Failed to import file: {}", e)], e.status_code())
        }
    };

    let mut context = Context::new();
    context.insert("title", "Import");
    context.insert("lines", &lines);
    render_with_status("import.html", &context, status)
}

/// Same upload as `/import`, answered with the counts as JSON.
#[post("/api/import")]
pub async fn import_api(body: Bytes, state: Data<AppState>) -> Result<impl Responder, AppError> {
    let format = ImportFormat::sniff(&body);
    let report = import::import_bytes(&state, format, body.to_vec())
        .await
        .map_err(|e| {
            log::error!("Failed to import file: {}", e);
            e
        })?;
    Ok(Json(report))
}

#[get("/api/users")]
pub async fn list_users_api(state: Data<AppState>) -> Result<impl Responder, AppError> {
    Ok(Json(db::get_all_users(&state).await?))
}

#[get("/api/users/{id}")]
pub async fn get_user_api(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    Ok(Json(db::get_user_by_id(&state, path.into_inner()).await?))
}

#[post("/api/users")]
pub async fn create_user_api(
    Json(data): Json<UserData>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = db::create_user(&state, &data).await?;
    Ok(HttpResponse::Created().json(user))
}

#[put("/api/users/{id}")]
pub async fn update_user_api(
    path: web::Path<i64>,
    Json(data): Json<UserData>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    Ok(Json(db::update_user(&state, path.into_inner(), &data).await?))
}

#[delete("/api/users/{id}")]
pub async fn delete_user_api(
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_user(&state, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_state, structs::fixtures::customer_data, structs::ImportReport};
    use actix_web::{http::StatusCode, test, App};

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(Data::new($state))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn customer_api_crud() {
        let app = app!(test_state().await);

        let data = customer_data("Lakshmi Pillai");
        let req = test::TestRequest::post()
            .uri("/api/customers")
            .set_json(&data)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Customer = test::read_body_json(resp).await;
        assert_eq!(created.data(), data);

        let req = test::TestRequest::get()
            .uri(&format!("/api/customers/{}", created.id))
            .to_request();
        let fetched: Customer = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched, created);

        let req = test::TestRequest::get()
            .uri("/api/customers?q=LAKSHMI")
            .to_request();
        let found: Vec<Customer> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(found, vec![created.clone()]);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/customers/{}", created.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/customers/{}", created.id))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn blank_name_is_a_bad_request() {
        let app = app!(test_state().await);
        let req = test::TestRequest::post()
            .uri("/api/customers")
            .set_json(customer_data(""))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = test::read_body(resp).await;
        assert_eq!(body, "Validation error: Customer name is required");
    }

    #[actix_web::test]
    async fn import_endpoint_reports_counts() {
        let app = app!(test_state().await);
        let csv = "customer_name,phone_number,email,address,state,purchase_date,gold_type,gold_quality,gold_weight,price_per_gram,total_amount,discount_percentage,discount_amount,final_amount,payment_mode\n\
                   Asha,1,a@example.com,x,y,2024-01-01,24K,Pure,1,6000,6000,0,0,6000,Cash\n\
                   ,2,b@example.com,x,y,2024-01-01,24K,Pure,1,6000,6000,0,0,6000,Cash\n";
        let req = test::TestRequest::post()
            .uri("/api/import")
            .insert_header(("Content-Type", "text/csv"))
            .set_payload(csv)
            .to_request();
        let report: ImportReport = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            report,
            ImportReport {
                success_count: 1,
                error_count: 1
            }
        );

        let req = test::TestRequest::post()
            .uri("/api/import")
            .set_payload("customer_name,email\nAsha,a@example.com\n")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn form_submission_derives_amounts() {
        let state = test_state().await;
        let app = app!(state.clone());
        let req = test::TestRequest::post()
            .uri("/customers")
            .set_form([
                ("customer_name", "Farah Khan"),
                ("purchase_date", "2024-06-01"),
                ("gold_type", "22K"),
                ("gold_quality", "Premium"),
                ("gold_weight", "8"),
                ("price_per_gram", "6500"),
                ("discount_percentage", "10"),
                ("payment_mode", "Card"),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let customers = db::get_all_customers(&state).await.unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].total_amount, 52000.0);
        assert_eq!(customers[0].discount_amount, 5200.0);
        assert_eq!(customers[0].final_amount, 46800.0);
    }

    #[actix_web::test]
    async fn index_lists_matching_customers() {
        let state = test_state().await;
        db::create_customer(&state, &customer_data("Gita Bose")).await.unwrap();
        db::create_customer(&state, &customer_data("Hari Das")).await.unwrap();
        let app = app!(state);

        let req = test::TestRequest::get().uri("/?q=gita").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("Gita Bose"));
        assert!(!html.contains("Hari Das"));
        assert!(html.contains("75000.00"));
        assert!(html.contains("12.500"));
    }

    #[actix_web::test]
    async fn create_without_purchase_date_uses_now() {
        let state = test_state().await;
        let app = app!(state.clone());
        let before = utils::now();
        let req = test::TestRequest::post()
            .uri("/api/customers")
            .set_json(serde_json::json!({
                "customer_name": "Neha Joshi",
                "gold_weight": 2.0,
                "price_per_gram": 6100.0,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Customer = test::read_body_json(resp).await;
        let after = utils::now();

        assert_eq!(created.customer_name, "Neha Joshi");
        assert!(created.purchase_date >= before && created.purchase_date <= after);
        assert_eq!(created.gold_weight, 2.0);
        assert_eq!(created.total_amount, 0.0);
        assert_eq!(created.email, None);
        assert_eq!(db::count_customers(&state).await, 1);
    }

    #[actix_web::test]
    async fn import_page_renders_summary() {
        let app = app!(test_state().await);
        let csv = "customer_name,phone_number,email,address,state,purchase_date,gold_type,gold_quality,gold_weight,price_per_gram,total_amount,discount_percentage,discount_amount,final_amount,payment_mode\n\
                   Asha,1,a@example.com,x,y,2024-01-01,24K,Pure,1,6000,6000,0,0,6000,Cash\n\
                   ,2,b@example.com,x,y,2024-01-01,24K,Pure,1,6000,6000,0,0,6000,Cash\n";
        let req = test::TestRequest::post()
            .uri("/import")
            .set_payload(csv)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("Successfully imported 1 records."));
        assert!(html.contains("Failed to import 1 records."));
        assert!(html.contains("Check the logs for details."));

        let req = test::TestRequest::post()
            .uri("/import")
            .set_payload("customer_name,email\nAsha,a@example.com\n")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = test::read_body(resp).await;
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("Failed to import file: Missing required columns"));
    }

    #[actix_web::test]
    async fn import_endpoint_accepts_workbooks() {
        let state = test_state().await;
        let app = app!(state.clone());
        let req = test::TestRequest::post()
            .uri("/api/import")
            .set_payload(&include_bytes!("../tests/fixtures/customers.xlsx")[..])
            .to_request();
        let report: ImportReport = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            report,
            ImportReport {
                success_count: 2,
                error_count: 1
            }
        );
        assert_eq!(db::count_customers(&state).await, 2);
    }

    #[actix_web::test]
    async fn edit_form_is_prefilled() {
        let state = test_state().await;
        let created = db::create_customer(&state, &customer_data("Gita Bose"))
            .await
            .unwrap();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri(&format!("/customers/{}/edit", created.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains(r#"value="Gita Bose""#));
        assert!(html.contains(r#"value="12.500""#));
        assert!(html.contains(r#"value="2024-03-15""#));

        let req = test::TestRequest::get().uri("/customers/999/edit").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    fn update_form() -> [(&'static str, &'static str); 8] {
        [
            ("customer_name", "Gita Bose"),
            ("purchase_date", "2024-07-01"),
            ("gold_type", "24K"),
            ("gold_quality", "Pure"),
            ("gold_weight", "2"),
            ("price_per_gram", "5000"),
            ("discount_percentage", "10"),
            ("payment_mode", "Cash"),
        ]
    }

    #[actix_web::test]
    async fn form_update_recomputes_amounts() {
        let state = test_state().await;
        let created = db::create_customer(&state, &customer_data("Gita Bose"))
            .await
            .unwrap();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri(&format!("/customers/{}", created.id))
            .set_form(update_form())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let updated = db::get_customer_by_id(&state, created.id).await.unwrap();
        assert_eq!(updated.gold_type.as_deref(), Some("24K"));
        assert_eq!(updated.total_amount, 10000.0);
        assert_eq!(updated.discount_amount, 1000.0);
        assert_eq!(updated.final_amount, 9000.0);
        assert_eq!(
            updated.purchase_date.format("%Y-%m-%d").to_string(),
            "2024-07-01"
        );
    }

    #[actix_web::test]
    async fn form_update_of_missing_id_is_not_found() {
        let state = test_state().await;
        let created = db::create_customer(&state, &customer_data("Gita Bose"))
            .await
            .unwrap();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri(&format!("/customers/{}", created.id + 1))
            .set_form(update_form())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        assert_eq!(db::get_all_customers(&state).await.unwrap(), vec![created]);
    }

    #[actix_web::test]
    async fn form_delete_removes_customer() {
        let state = test_state().await;
        let created = db::create_customer(&state, &customer_data("Gita Bose"))
            .await
            .unwrap();
        let app = app!(state.clone());
        let uri = format!("/customers/{}/delete", created.id);

        let req = test::TestRequest::post().uri(&uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(db::count_customers(&state).await, 0);

        let req = test::TestRequest::post().uri(&uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn user_api_round_trip() {
        let app = app!(test_state().await);
        let data = UserData {
            last_name: "Verma".to_string(),
            first_name: "Amit".to_string(),
            ..Default::default()
        };
        let req = test::TestRequest::post()
            .uri("/api/users")
            .set_json(&data)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/api/users").to_request();
        let users: Vec<crate::structs::User> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].first_name, "Amit");

        let req = test::TestRequest::get().uri("/api/users/999").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
