use super::*;
use crate::token::tests::TEST_PRIVATE_KEY_PEM;
use crate::token::{SigningKey, StaticKeySource};
use serde_json::json;

const ISSUER: &str = "https://sso.example.test";
const PARTNER: &str = "https://partner.example.test";
const AUDIENCE: &str = "https://app.example.test";

struct Fixture {
    engine: SessionEngine,
    local_key: SigningKey,
    partner_key: SigningKey,
}

fn fixture() -> Result<Fixture, Error> {
    let local_key = SigningKey::ed25519_from_seed(&[7; 32]);
    let partner_key = SigningKey::ed25519_from_seed(&[9; 32]);

    let mut registry = VerifierRegistryBuilder::new();
    let mut builder = SessionEngineBuilder::new();
    builder.register_issuer(
        &mut registry,
        IssuerRegistration::local(
            ISSUER,
            ["read", "write"],
            Arc::new(StaticKeySource::new().with_key("k1", local_key.clone())),
        ),
    )?;
    builder.register_issuer(
        &mut registry,
        IssuerRegistration::remote(
            PARTNER,
            ["read"],
            Jwks {
                keys: vec![partner_key.verifying_key().to_jwk("p1")],
            },
        ),
    )?;

    Ok(Fixture {
        engine: builder.build(Arc::new(registry.seal())),
        local_key,
        partner_key,
    })
}

fn alice() -> Principal {
    Principal::identity(SessionPrincipal {
        realm: ISSUER.to_string(),
        issuer: ISSUER.to_string(),
        name: "alice".to_string(),
    })
}

fn header() -> SessionHeader {
    SessionHeader::new(ISSUER, AUDIENCE, "k1", Algorithm::EdDsa)
        .with_principal(alice())
        .with_principal(Principal::scope("read", ISSUER))
}

fn claims(token: &str) -> Result<Value, Error> {
    Ok(jws::decode_unverified(token)?)
}

#[test]
fn issues_access_token() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let token = engine.create(&header())?;

    let claims = claims(token.access_token())?;
    assert_eq!(claims["iss"], ISSUER);
    assert_eq!(claims["aud"], AUDIENCE);
    assert_eq!(claims["sub"], "alice");
    assert_eq!(claims["realm"], ISSUER);
    assert_eq!(claims["scope"], "read");
    let iat = claims["iat"].as_i64().unwrap_or_default();
    let exp = claims["exp"].as_i64().unwrap_or_default();
    assert_eq!(exp - iat, 120);
    assert_eq!(token.token_expires().unix_timestamp(), exp);

    let nonce = claims["nonce"].as_str().unwrap_or_default();
    assert!(id::verify(nonce, Duration::ZERO).is_ok());

    assert_eq!(jws::peek_header(token.access_token())?.typ, ACCESS_TOKEN_TYPE);
    assert!(token.refresh_token().is_none());
    assert!(token.session_expires().is_none());
    assert_eq!(token.principal_name(), Some("alice"));
    Ok(())
}

#[test]
fn signs_with_rsa_keys() -> Result<(), Error> {
    let key = SigningKey::rs256_from_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes())?;
    let mut registry = VerifierRegistryBuilder::new();
    let mut builder = SessionEngineBuilder::new();
    let jwks = builder.register_issuer(
        &mut registry,
        IssuerRegistration::local(
            ISSUER,
            ["read"],
            Arc::new(StaticKeySource::new().with_key("rsa-1", key)),
        ),
    )?;
    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].kty, "RSA");

    let engine = builder.build(Arc::new(registry.seal()));
    let header = SessionHeader::new(ISSUER, AUDIENCE, "rsa-1", Algorithm::Rs256)
        .with_principal(alice())
        .with_principal(Principal::scope("read", ISSUER));
    let token = engine.create(&header)?;
    assert_eq!(jws::peek_header(token.access_token())?.alg, Algorithm::Rs256);

    let authorized = engine.authorize(token.access_token())?;
    assert_eq!(authorized.principal_name(), Some("alice"));
    Ok(())
}

#[test]
fn ttl_is_rounded_up_to_seconds() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let token = engine.create(&header().with_token_ttl(Duration::from_millis(1500)))?;
    let claims = claims(token.access_token())?;
    let iat = claims["iat"].as_i64().unwrap_or_default();
    assert_eq!(claims["exp"].as_i64(), Some(iat + 2));

    let result = engine.create(&header().with_token_ttl(Duration::ZERO));
    assert!(matches!(result, Err(Error::InvalidTtl)));
    Ok(())
}

#[test]
fn attributes_become_claims() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let token = engine.create(
        &header().with_principal(Principal::attribute("alice", "email", "alice@example.test")),
    )?;
    assert_eq!(claims(token.access_token())?["email"], "alice@example.test");
    Ok(())
}

#[test]
fn duplicate_attribute_is_rejected() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = header()
        .with_principal(Principal::attribute("alice", "email", "a@example.test"))
        .with_principal(Principal::attribute("alice", "email", "b@example.test"));

    let err = engine.create(&header).err();
    assert!(matches!(&err, Some(Error::DuplicateAttribute(name)) if name == "email"));
    assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Configuration));
    Ok(())
}

#[test]
fn attribute_cannot_shadow_standard_claims() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    for claim in ["sub", "exp", "scope", "nonce"] {
        let header = header().with_principal(Principal::attribute("alice", claim, "x"));
        assert!(matches!(
            engine.create(&header),
            Err(Error::DuplicateAttribute(name)) if name == claim
        ));
    }
    Ok(())
}

#[test]
fn attribute_of_another_principal_is_rejected() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = header().with_principal(Principal::attribute("bob", "email", "bob@example.test"));
    assert!(matches!(engine.create(&header), Err(Error::InvalidPrincipal(_))));
    Ok(())
}

#[test]
fn primary_principal_must_be_an_identity() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = SessionHeader::new(ISSUER, AUDIENCE, "k1", Algorithm::EdDsa)
        .with_principal(Principal::scope("read", ISSUER))
        .with_principal(alice());
    assert!(matches!(engine.create(&header), Err(Error::InvalidPrincipal(_))));
    Ok(())
}

#[test]
fn scopes_must_belong_to_the_issuer() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;

    let foreign = header().with_principal(Principal::scope("write", PARTNER));
    assert!(matches!(engine.create(&foreign), Err(Error::InvalidScope(name)) if name == "write"));

    let unknown = header().with_principal(Principal::scope("admin", ISSUER));
    assert!(matches!(engine.create(&unknown), Err(Error::InvalidScope(name)) if name == "admin"));

    let none = SessionHeader::new(ISSUER, AUDIENCE, "k1", Algorithm::EdDsa).with_principal(alice());
    assert!(matches!(engine.create(&none), Err(Error::MissingScope)));
    Ok(())
}

#[test]
fn only_authoritative_issuers_create_tokens() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;

    let remote = SessionHeader::new(PARTNER, AUDIENCE, "p1", Algorithm::EdDsa)
        .with_principal(alice())
        .with_principal(Principal::scope("read", PARTNER));
    assert!(matches!(engine.create(&remote), Err(Error::NotAuthoritative(_))));

    let unknown = SessionHeader::new("https://unknown.example.test", AUDIENCE, "k1", Algorithm::EdDsa)
        .with_principal(alice());
    assert!(matches!(engine.create(&unknown), Err(Error::IssuerNotRegistered(_))));
    Ok(())
}

#[test]
fn incomplete_header_is_rejected() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;

    let mut missing_audience = header();
    missing_audience.audience.clear();
    assert!(matches!(
        engine.create(&missing_audience),
        Err(Error::MissingField("audience"))
    ));

    let no_principals = SessionHeader::new(ISSUER, AUDIENCE, "k1", Algorithm::EdDsa);
    assert!(matches!(
        engine.create(&no_principals),
        Err(Error::MissingField("principals"))
    ));
    Ok(())
}

#[test]
fn unknown_signing_key_is_a_configuration_error() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;

    let mut wrong_kid = header();
    wrong_kid.key_id = "k2".to_string();
    let err = engine.create(&wrong_kid).err();
    assert!(matches!(&err, Some(Error::KeyResolution { kid, .. }) if kid == "k2"));
    assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Configuration));

    let mut wrong_alg = header();
    wrong_alg.algorithm = Algorithm::Rs256;
    assert!(matches!(engine.create(&wrong_alg), Err(Error::KeyResolution { .. })));
    Ok(())
}

#[test]
fn refresh_issues_new_access_token() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = header()
        .with_principal(Principal::attribute("alice", "email", "alice@example.test"))
        .with_refresh(true)
        .with_token_ttl(Duration::from_secs(60))
        .with_session_ttl(Duration::from_secs(600));
    let token = engine.create(&header)?;
    let refresh_token = token.refresh_token().unwrap_or_default();
    assert_eq!(jws::peek_header(refresh_token)?.typ, REFRESH_TOKEN_TYPE);

    let refresh_claims = claims(refresh_token)?;
    assert_eq!(refresh_claims["aud"], ISSUER);
    assert_eq!(refresh_claims["sub"], AUDIENCE);
    assert_eq!(
        token.session_expires().map(OffsetDateTime::unix_timestamp),
        refresh_claims["exp"].as_i64()
    );

    let refreshed = engine.refresh(&header.principals, refresh_token)?;
    let access = claims(refreshed.access_token())?;
    assert_eq!(access["aud"], AUDIENCE);
    assert_eq!(access["sub"], "alice");
    assert_eq!(access["email"], "alice@example.test");
    let iat = access["iat"].as_i64().unwrap_or_default();
    assert_eq!(access["exp"].as_i64(), Some(iat + 60));
    assert_ne!(refreshed.access_token(), token.access_token());

    let renewed = refreshed.refresh_token().unwrap_or_default();
    assert_eq!(claims(renewed)?["exp"], refresh_claims["exp"]);
    Ok(())
}

#[test]
fn refresh_stops_at_session_end() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = header()
        .with_refresh(true)
        .with_token_ttl(Duration::from_secs(60))
        .with_session_ttl(Duration::from_secs(30));
    let token = engine.create(&header)?;

    let refreshed = engine.refresh(&header.principals, token.refresh_token().unwrap_or_default())?;
    assert!(refreshed.refresh_token().is_none());
    assert!(refreshed.session_expires().is_none());
    Ok(())
}

#[test]
fn refresh_requires_the_same_principals() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = header().with_refresh(true);
    let token = engine.create(&header)?;
    let refresh_token = token.refresh_token().unwrap_or_default();

    let widened = header
        .clone()
        .with_principal(Principal::scope("write", ISSUER));
    let err = engine.refresh(&widened.principals, refresh_token).err();
    assert!(matches!(err, Some(Error::PrincipalMismatch)));

    let annotated = header
        .clone()
        .with_principal(Principal::attribute("alice", "email", "alice@example.test"));
    assert!(matches!(
        engine.refresh(&annotated.principals, refresh_token),
        Err(Error::PrincipalMismatch)
    ));
    Ok(())
}

#[test]
fn access_token_cannot_refresh() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let header = header().with_refresh(true);
    let token = engine.create(&header)?;
    assert!(matches!(
        engine.refresh(&header.principals, token.access_token()),
        Err(Error::InvalidTokenType(_))
    ));
    Ok(())
}

fn refresh_claims(iss: &str, exp: i64) -> RefreshClaims {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    RefreshClaims {
        jti: Uuid::now_v7().to_string(),
        iss: iss.to_string(),
        aud: iss.to_string(),
        iat: now - 600,
        exp,
        sub: AUDIENCE.to_string(),
        principal: "alice".to_string(),
        scope: "read".to_string(),
        sha: "unused".to_string(),
        ttl: 60,
    }
}

#[test]
fn refresh_rejects_expired_session() -> Result<(), Error> {
    let Fixture {
        engine, local_key, ..
    } = fixture()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let expired = jws::sign(
        &local_key,
        "k1",
        REFRESH_TOKEN_TYPE,
        &refresh_claims(ISSUER, now),
    )?;

    let err = engine.refresh(&header().principals, &expired).err();
    assert!(matches!(err, Some(Error::Expired)));
    assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Authentication));
    Ok(())
}

#[test]
fn refresh_rejects_remote_issuer_tokens() -> Result<(), Error> {
    let Fixture {
        engine,
        partner_key,
        ..
    } = fixture()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let remote = jws::sign(
        &partner_key,
        "p1",
        REFRESH_TOKEN_TYPE,
        &refresh_claims(PARTNER, now + 600),
    )?;
    let principals = vec![
        Principal::identity(SessionPrincipal {
            realm: PARTNER.to_string(),
            issuer: PARTNER.to_string(),
            name: "alice".to_string(),
        }),
        Principal::scope("read", PARTNER),
    ];

    let err = engine.refresh(&principals, &remote).err();
    assert!(matches!(&err, Some(Error::NotRefreshable(iss)) if iss == PARTNER));
    assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Authentication));
    Ok(())
}

#[test]
fn authorize_rebuilds_subject() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let token = engine.create(
        &header()
            .with_principal(Principal::scope("write", ISSUER))
            .with_principal(Principal::attribute("alice", "email", "alice@example.test")),
    )?;

    let authorized = engine.authorize_for(AUDIENCE, token.access_token())?;
    assert_eq!(authorized.principal_name(), Some("alice"));
    assert_eq!(authorized.scopes(), vec!["read", "write"]);
    let attributes = authorized.attributes();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].name, "email");
    assert_eq!(attributes[0].value, "alice@example.test");
    assert_eq!(authorized.token_expires(), token.token_expires());

    let err = engine
        .authorize_for("https://other.example.test", token.access_token())
        .err();
    assert!(matches!(err, Some(Error::InvalidAudience)));
    Ok(())
}

#[test]
fn authorize_rejects_refresh_tokens() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let token = engine.create(&header().with_refresh(true))?;
    let err = engine
        .authorize(token.refresh_token().unwrap_or_default())
        .err();
    assert!(matches!(&err, Some(Error::InvalidTokenType(typ)) if typ == REFRESH_TOKEN_TYPE));
    assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Authentication));
    Ok(())
}

#[test]
fn authorize_accepts_remote_issuer_tokens() -> Result<(), Error> {
    let Fixture {
        engine,
        partner_key,
        ..
    } = fixture()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let token = jws::sign(
        &partner_key,
        "p1",
        ACCESS_TOKEN_TYPE,
        &json!({
            "jti": "remote-1",
            "iss": PARTNER,
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 60,
            "sub": "bob",
            "realm": PARTNER,
            "scope": "read admin",
        }),
    )?;

    let authorized = engine.authorize(&token)?;
    assert_eq!(authorized.principal_name(), Some("bob"));
    assert_eq!(authorized.scopes(), vec!["read"]);
    Ok(())
}

#[test]
fn authorize_reads_only_custom_claims_as_attributes() -> Result<(), Error> {
    let Fixture {
        engine,
        partner_key,
        ..
    } = fixture()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let token = jws::sign(
        &partner_key,
        "p1",
        ACCESS_TOKEN_TYPE,
        &json!({
            "jti": "remote-3",
            "iss": PARTNER,
            "aud": [AUDIENCE, "https://reports.example.test"],
            "iat": now,
            "nbf": now,
            "exp": now + 60,
            "azp": "reports",
            "auth_time": now - 30,
            "sub": "bob",
            "realm": PARTNER,
            "scope": "read",
            "department": "physics",
        }),
    )?;

    let authorized = engine.authorize_for(AUDIENCE, &token)?;
    let attributes = authorized.attributes();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].name, "department");
    assert_eq!(attributes[0].value, "physics");

    assert!(engine.authorize_for("https://reports.example.test", &token).is_ok());
    assert!(matches!(
        engine.authorize_for("https://other.example.test", &token),
        Err(Error::InvalidAudience)
    ));
    Ok(())
}

#[test]
fn authorize_rejects_realm_mismatch() -> Result<(), Error> {
    let Fixture {
        engine,
        partner_key,
        ..
    } = fixture()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let token = jws::sign(
        &partner_key,
        "p1",
        ACCESS_TOKEN_TYPE,
        &json!({
            "jti": "remote-2",
            "iss": PARTNER,
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 60,
            "sub": "mallory",
            "realm": ISSUER,
            "scope": "read",
        }),
    )?;

    let err = engine.authorize(&token).err();
    assert!(matches!(
        &err,
        Some(Error::Registry(registry::Error::Authentication { .. }))
    ));
    let challenge = err.map(|err| err.challenge(None).challenge()).unwrap_or_default();
    assert!(challenge.contains(PARTNER));
    Ok(())
}

#[test]
fn authorize_rejects_expired_and_forged_tokens() -> Result<(), Error> {
    let Fixture {
        engine,
        local_key,
        partner_key,
    } = fixture()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = |exp: i64| {
        json!({
            "jti": "local-1",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "iat": now - 120,
            "exp": exp,
            "sub": "alice",
            "realm": ISSUER,
            "scope": "read",
        })
    };

    let expired = jws::sign(&local_key, "k1", ACCESS_TOKEN_TYPE, &claims(now))?;
    assert!(matches!(engine.authorize(&expired), Err(Error::Expired)));

    let forged = jws::sign(&partner_key, "k1", ACCESS_TOKEN_TYPE, &claims(now + 60))?;
    assert!(matches!(engine.authorize(&forged), Err(Error::Token(_))));

    let unknown = jws::sign(
        &local_key,
        "k1",
        ACCESS_TOKEN_TYPE,
        &json!({ "iss": "https://unknown.example.test" }),
    )?;
    assert!(matches!(engine.authorize(&unknown), Err(Error::UnknownIssuer(_))));

    assert!(matches!(engine.authorize("not-a-token"), Err(Error::Token(_))));
    Ok(())
}

#[test]
fn register_issuer_validates_input() -> Result<(), Error> {
    let key = SigningKey::ed25519_from_seed(&[3; 32]);
    let keys: Arc<dyn KeySource> = Arc::new(StaticKeySource::new().with_key("k1", key));
    let mut registry = VerifierRegistryBuilder::new();
    let mut builder = SessionEngineBuilder::new();

    let relative = IssuerRegistration::local("sso", ["read"], keys.clone());
    assert!(matches!(
        builder.register_issuer(&mut registry, relative),
        Err(Error::InvalidRegistration(_))
    ));

    let no_scopes = IssuerRegistration::local(ISSUER, Vec::<String>::new(), keys.clone());
    assert!(matches!(
        builder.register_issuer(&mut registry, no_scopes),
        Err(Error::InvalidRegistration(_))
    ));

    let no_keys = IssuerRegistration::local(ISSUER, ["read"], Arc::new(StaticKeySource::new()));
    assert!(matches!(
        builder.register_issuer(&mut registry, no_keys),
        Err(Error::InvalidRegistration(_))
    ));

    builder.register_issuer(
        &mut registry,
        IssuerRegistration::local(ISSUER, ["read"], keys.clone()),
    )?;
    let err = builder
        .register_issuer(
            &mut registry,
            IssuerRegistration::local(ISSUER, ["read"], keys.clone()),
        )
        .err();
    assert!(matches!(&err, Some(Error::IssuerAlreadyRegistered(_))));
    assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::IllegalState));

    registry.register_verifier::<SessionPrincipal, _>(PARTNER, false, |_| Ok(()))?;
    assert!(matches!(
        builder.register_issuer(
            &mut registry,
            IssuerRegistration::local(PARTNER, ["read"], keys)
        ),
        Err(Error::Registry(registry::Error::AlreadyRegistered(_)))
    ));
    Ok(())
}

#[test]
fn publishes_issuer_keys() -> Result<(), Error> {
    let Fixture { engine, .. } = fixture()?;
    let jwks = engine.jwks(ISSUER).unwrap_or_default();
    assert!(jwks.find_by_kid("k1").is_some());
    assert!(engine.jwks("https://unknown.example.test").is_none());
    assert!(engine.registry().is_authoritative(ISSUER));
    assert!(!engine.registry().is_authoritative(PARTNER));
    Ok(())
}
