//! Library-level scenarios: login, entity navigation, token issuance and
//! verification on the resource-server side.

use std::sync::Arc;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use castellan::cache::BoundedCache;
use castellan::identity::{
    AuthDispatcher, Authorizer, CredentialType, EntityAuthorizer, Principal, StaticPasswordAuthenticator, StoreAuthorizer,
    StorePasswordAuthenticator, TokenAuthenticator, hash_password, verify_password,
};
use castellan::store::{MemoryStore, SharedStore, UserRecord};
use castellan::token::validator::DEFAULT_GRACE_SECS;
use castellan::token::{
    FixedClock, RejectReason, SharedSecret, StaticHostIdentity, TokenCodec, TokenPayload, TokenValidator,
};
use castellan::AuthError;

const NOW: i64 = 1_700_000_000;

fn secret() -> SharedSecret { SharedSecret::new("the shire is quiet tonight").unwrap() }

fn validator(clock: Arc<FixedClock>) -> TokenValidator {
    TokenValidator::new(TokenCodec::new(secret()))
        .with_clock(clock)
        .with_host_identity(Arc::new(StaticHostIdentity::new(["gs1"])))
}

#[test]
fn fellowship_scenario_in_memory() -> Result<()> {
    let clock = Arc::new(FixedClock::new(NOW));
    let entities = Arc::new(EntityAuthorizer::new().with_codec(TokenCodec::new(secret())).with_clock(clock.clone()));
    let fii = Principal::new("fii");
    entities.grant_path(&fii, "LotR:Two_Towers:Eowin")?;

    let dispatcher = AuthDispatcher::builder()
        .authenticator(Arc::new(StaticPasswordAuthenticator::new().with_user("fii", "br")?))
        .authorizer(entities.clone())
        .build();

    let principal = dispatcher.authenticate(CredentialType::Basic, STANDARD.encode("fii:br").as_bytes())?;
    assert_eq!(principal, fii);

    let lotr = dispatcher.resolve_identifier("LotR")?;
    let children = dispatcher.entities_for(&principal, Some(&lotr))?;
    assert!(children.iter().any(|e| e.label() == "Two_Towers"));

    let eowin = dispatcher.resolve_identifier("LotR:Two_Towers:Eowin")?;
    assert!(eowin.is_leaf());
    let token = dispatcher.issue_token(&principal, &eowin)?;

    let accepted = validator(clock).validate(&token)?;
    assert_eq!(accepted.principal, fii);
    assert_eq!(accepted.entity, "LotR:Two_Towers:Eowin");
    Ok(())
}

#[test]
fn fellowship_scenario_store_backed() -> Result<()> {
    let clock = Arc::new(FixedClock::new(NOW));
    let store: SharedStore = Arc::new(MemoryStore::new());
    store.create_user(UserRecord::new("fii", hash_password("br")?))?;
    let grants = Arc::new(StoreAuthorizer::new(store.clone(), 16)?.with_codec(TokenCodec::new(secret())).with_clock(clock.clone()));
    grants.grant(&Principal::new("fii"), "LotR:Two_Towers:Eowin", 0)?;

    let dispatcher = AuthDispatcher::builder()
        .authenticator(Arc::new(StorePasswordAuthenticator::new(store.clone())))
        .authorizer(grants)
        .build();

    let fii = dispatcher.authenticate(CredentialType::Basic, STANDARD.encode("fii:br").as_bytes())?;
    assert!(matches!(
        dispatcher.authenticate(CredentialType::Basic, STANDARD.encode("fii:bz").as_bytes()),
        Err(AuthError::AuthenticationFailed)
    ));

    let roots = dispatcher.entities_for(&fii, None)?;
    assert_eq!(roots.iter().map(|e| e.label()).collect::<Vec<_>>(), vec!["LotR"]);
    let lotr = dispatcher.resolve_identifier("LotR")?;
    assert!(dispatcher.entities_for(&fii, Some(&lotr))?.iter().any(|e| e.label() == "Two_Towers"));

    let eowin = dispatcher.resolve_identifier("LotR:Two_Towers:Eowin")?;
    let token = dispatcher.issue_token(&fii, &eowin)?;

    // Resource server side: name-checked token login.
    let gs = AuthDispatcher::builder().authenticator(Arc::new(TokenAuthenticator::new(validator(clock)))).build();
    let presented = STANDARD.encode(format!("fii:{token}"));
    assert_eq!(gs.authenticate(CredentialType::Token, presented.as_bytes())?, fii);
    let stolen = STANDARD.encode(format!("foo:{token}"));
    assert!(gs.authenticate(CredentialType::Token, stolen.as_bytes()).is_err());
    Ok(())
}

#[test]
fn password_hashes_verify_only_their_password() -> Result<()> {
    for (a, b) in [("br", "bz"), ("", " "), ("MyVerySecretPassword", "MyVerySecretPassworD")] {
        let h = hash_password(a)?;
        assert!(verify_password(a, &h)?);
        assert!(!verify_password(b, &h)?);
    }
    Ok(())
}

#[test]
fn freshness_boundaries() -> Result<()> {
    let codec = TokenCodec::new(secret());
    let v = validator(Arc::new(FixedClock::new(NOW)));
    let at = |t: i64| codec.issue(&TokenPayload::new("fii", "LotR:Two_Towers:Eowin", t));

    assert!(v.validate(&at(NOW)?).is_ok());
    assert_eq!(v.validate(&at(NOW - DEFAULT_GRACE_SECS - 1)?).unwrap_err().reason(), RejectReason::Expired);
    assert_eq!(v.validate(&at(NOW + 1)?).unwrap_err().reason(), RejectReason::FromFuture);
    Ok(())
}

#[test]
fn single_bit_flips_are_rejected() -> Result<()> {
    let codec = TokenCodec::new(secret());
    let payload = TokenPayload::new("fii", "LotR:Two_Towers:Eowin", NOW).with_origin("gs1");
    let raw = STANDARD.decode(codec.issue(&payload)?)?;

    for idx in 40..raw.len() {
        for bit in 0..8 {
            let mut flipped = raw.clone();
            flipped[idx] ^= 1 << bit;
            let result = codec.consume(&STANDARD.encode(&flipped));
            assert!(matches!(result, Err(AuthError::DecodeError(_))), "byte {idx} bit {bit}");
        }
    }
    Ok(())
}

#[test]
fn holder_cannot_rewrite_principal_or_date() -> Result<()> {
    let clock = Arc::new(FixedClock::new(NOW));
    let codec = TokenCodec::new(secret());
    let real = TokenPayload::new("fii", "LotR:Two_Towers:Eowin", NOW);
    let wanted = TokenPayload::new("foo", "LotR:Two_Towers:Eowin", NOW + 86_400);
    let mut raw = STANDARD.decode(codec.issue(&real)?)?;
    for (i, (x, y)) in real.encode().bytes().zip(wanted.encode().bytes()).enumerate() {
        raw[40 + i] ^= x ^ y;
    }
    clock.set(NOW + 86_400);
    let rejected = validator(clock).validate(&STANDARD.encode(&raw)).unwrap_err();
    assert_eq!(rejected.reason(), RejectReason::Undecodable);
    Ok(())
}

#[test]
fn cache_evicts_first_inserted_even_after_access() -> Result<()> {
    let mut cache = BoundedCache::new(3)?;
    for k in ["a", "b", "c"] {
        cache.put(k, k.len());
    }
    assert!(cache.get("a").is_some());
    cache.put("d", 1);
    assert_eq!(cache.len(), 3);
    assert!(!cache.contains_key("a"));
    assert!(cache.contains_key("b") && cache.contains_key("c") && cache.contains_key("d"));
    Ok(())
}

#[test]
fn resolution_builds_paths() -> Result<()> {
    let entities = EntityAuthorizer::new();
    let boromir = entities.resolve("LotR:Fellowship:Boromir")?;
    assert_eq!(boromir.identifier_path(), "LotR:Fellowship:Boromir");
    assert!(!entities.resolve("LotR:Fellowship")?.is_leaf());
    assert!(matches!(entities.resolve("LotR::Boromir"), Err(AuthError::InvalidIdentifier(_))));
    Ok(())
}
