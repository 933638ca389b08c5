use corvus_gateway::{
    interaction::{Interaction, InteractionResponse, InteractionResponseFlags},
    rest::{BoxError, RestClient},
    router::deferred::{deferrable, DeferrableConfig},
    router::Router,
};
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Default)]
struct RecordingRest {
    posted: Mutex<Vec<(String, String)>>,
}

impl RestClient for RecordingRest {
    fn post_followup<'a>(
        &'a self,
        application_id: &'a str,
        interaction_token: &'a str,
        _response: &'a InteractionResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>> {
        self.posted.lock().unwrap().push((application_id.to_owned(), interaction_token.to_owned()));
        Box::pin(async { Ok(()) })
    }
}

fn slash_command(name: &str) -> Interaction {
    Interaction {
        id: "1".into(),
        application_id: "app".into(),
        token: "tok".into(),
        kind_raw: 2,
        data: Some(serde_json::json!({ "id": "9", "name": name, "options": [] })),
    }
}

/// A handler that outruns a short deferral window gets a placeholder
/// response immediately, and its eventual result is posted as a REST
/// follow-up once it completes.
#[tokio::test(start_paused = true)]
async fn slow_command_is_deferred_then_followed_up_through_the_router() {
    let rest = Arc::new(RecordingRest::default());
    let on_error: Arc<dyn Fn(String) + Send + Sync> = Arc::new(|message| panic!("unexpected router error: {message}"));

    let middleware = deferrable(
        rest.clone(),
        DeferrableConfig {
            window: Duration::from_millis(10),
            flags: InteractionResponseFlags::default(),
        },
        on_error,
    );

    let router = Router::builder()
        .root_middleware(middleware)
        .command(
            &["slow"],
            Arc::new(|_ctx| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Some(InteractionResponse::message("done", InteractionResponseFlags::default()))
                })
            }),
            None,
            vec![],
        )
        .unwrap()
        .build();

    let response = router.dispatch(slash_command("slow")).await;
    assert!(response.is_some(), "the deferred placeholder should come back immediately");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(1, rest.posted.lock().unwrap().len());
}

/// A handler that finishes inside the window is never deferred and the
/// REST collaborator is never touched.
#[tokio::test(start_paused = true)]
async fn fast_command_is_never_deferred() {
    let rest = Arc::new(RecordingRest::default());
    let on_error: Arc<dyn Fn(String) + Send + Sync> = Arc::new(|_| {});

    let middleware = deferrable(rest.clone(), DeferrableConfig::default(), on_error);

    let router = Router::builder()
        .root_middleware(middleware)
        .command(
            &["ping"],
            Arc::new(|_ctx| Box::pin(async { Some(InteractionResponse::message("pong", InteractionResponseFlags::default())) })),
            None,
            vec![],
        )
        .unwrap()
        .build();

    let response = router.dispatch(slash_command("ping")).await;
    assert!(response.is_some());
    assert!(rest.posted.lock().unwrap().is_empty());
}
