//! The HTTP control surface of the appliance.
//!
//! | Method | Path            | Body             |
//! |--------|-----------------|------------------|
//! | GET    | `/`             |                  |
//! | GET    | `/status`       |                  |
//! | POST   | `/cmd/set/snd`  | `value=on\|off`  |
//! | POST   | `/cmd/set/gms`  | `value=<int>`    |
//! | POST   | `/cmd/set/atc`  | `value=<int>`    |
//! | POST   | `/cmd/save`     |                  |
//!
//! Everything but `/` needs `Authorization: Bearer <api key>`.

use axum::http::StatusCode;
use tracing::{debug, info};

use crate::{
    device::Field,
    error::Error,
    http::{
        form::Form,
        guard::{post, protected},
        pattern::Template,
        router::{App, HeaderMode, RouteOptions},
        Disposition, Handler, HandlerFuture, Request, Response,
    },
    scheduler::BridgeHandle,
};

/// Body of a successful command.
pub const OK: &str = "Ok\n";

/// Build the route tree.
pub fn routes(bridge: BridgeHandle, api_key: &str, banner: &str) -> App {
    let cmd = App::new("cmd")
        .route(
            "/set/snd",
            protected(api_key, post(SetSnd(bridge.clone()))),
        )
        .route(
            Template::new("/set/{field:gms|atc}"),
            protected(api_key, post(SetSetting(bridge.clone()))),
        )
        .route("/save", protected(api_key, post(Save(bridge.clone()))))
        .on_init(|name| info!(%name, "Command routes in use"));

    App::new("root")
        .route_with(
            "/",
            Index(banner.to_owned()),
            RouteOptions {
                headers: Some(HeaderMode::Skip),
            },
        )
        .route("/status", protected(api_key, Status(bridge)))
        .mount("/cmd", cmd)
}

/// `GET /`: the banner.
pub struct Index(String);

impl Index {
    async fn serve(&self, response: &mut Response) -> Result<Disposition, Error> {
        response.text(&self.0).await?;

        Ok(Disposition::Close)
    }
}

impl Handler for Index {
    fn call<'a>(&'a self, _request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(response))
    }
}

/// `GET /status`: refresh everything from the instrument and report it.
pub struct Status(BridgeHandle);

impl Status {
    async fn serve(&self, response: &mut Response) -> Result<Disposition, Error> {
        self.0.query_all().await?;

        let snapshot = self.0.snapshot();
        debug!(?snapshot, "Status");
        response.json(&snapshot).await?;

        Ok(Disposition::Close)
    }
}

impl Handler for Status {
    fn call<'a>(&'a self, _request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(response))
    }
}

fn form(request: &Request) -> Result<&Form, Error> {
    request
        .form
        .as_ref()
        .ok_or_else(|| Error::BadRequest("no form data".into()))
}

/// `POST /cmd/set/snd`: switch the buzzer.
pub struct SetSnd(BridgeHandle);

impl SetSnd {
    async fn serve(&self, request: &mut Request, response: &mut Response) -> Result<Disposition, Error> {
        let on = match form(request)?.value("value")? {
            "on" => true,
            "off" => false,
            other => {
                return Err(Error::BadForm {
                    key: "value".into(),
                    problem: format!("`{other}` is neither `on` nor `off`"),
                })
            }
        };

        self.0.set_snd(on).await?;
        response.text(OK).await?;

        Ok(Disposition::Close)
    }
}

impl Handler for SetSnd {
    fn call<'a>(&'a self, request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(request, response))
    }
}

/// `POST /cmd/set/{gms|atc}`: write a numeric setting.
pub struct SetSetting(BridgeHandle);

impl SetSetting {
    async fn serve(&self, request: &mut Request, response: &mut Response) -> Result<Disposition, Error> {
        let field = request
            .captures
            .as_ref()
            .and_then(|captures| captures.get("field"))
            .and_then(|field| match field.as_str() {
                "gms" => Some(Field::Gms),
                "atc" => Some(Field::Atc),
                _ => None,
            })
            .ok_or(Error::Rejected(StatusCode::NOT_FOUND))?;

        let value = form(request)?.parse_value::<i64>("value")?;

        if field == Field::Gms {
            self.0.set_gms(value).await?;
        } else {
            self.0.set_atc(value).await?;
        }

        response.text(OK).await?;

        Ok(Disposition::Close)
    }
}

impl Handler for SetSetting {
    fn call<'a>(&'a self, request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(request, response))
    }
}

/// `POST /cmd/save`: persist the settings on the instrument.
pub struct Save(BridgeHandle);

impl Save {
    async fn serve(&self, response: &mut Response) -> Result<Disposition, Error> {
        self.0.save().await?;
        response.text(OK).await?;

        Ok(Disposition::Close)
    }
}

impl Handler for Save {
    fn call<'a>(&'a self, _request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(response))
    }
}
