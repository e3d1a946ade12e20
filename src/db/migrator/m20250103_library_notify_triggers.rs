use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Queues one pending sync row per linked provider for every library
/// mutation and publishes it on `library_sync`.
const LIBRARY_SYNC_FUNCTION: &str = r"
CREATE OR REPLACE FUNCTION library_sync_enqueue() RETURNS trigger AS $$
DECLARE
    linked RECORD;
    act TEXT;
    body JSONB;
    uid TEXT;
    aid TEXT;
BEGIN
    IF TG_OP = 'DELETE' THEN
        uid := OLD.user_id;
        aid := OLD.anime_id;
        act := 'delete_entry';
        body := '{}'::jsonb;
    ELSIF TG_OP = 'INSERT' THEN
        uid := NEW.user_id;
        aid := NEW.anime_id;
        act := 'add_entry';
        body := jsonb_build_object('status', NEW.status, 'watched_episodes', NEW.watched_episodes);
    ELSE
        uid := NEW.user_id;
        aid := NEW.anime_id;
        IF NEW.status IS DISTINCT FROM OLD.status
           AND NEW.watched_episodes IS DISTINCT FROM OLD.watched_episodes THEN
            act := 'add_entry';
            body := jsonb_build_object('status', NEW.status, 'watched_episodes', NEW.watched_episodes);
        ELSIF NEW.status IS DISTINCT FROM OLD.status THEN
            act := 'update_status';
            body := jsonb_build_object('status', NEW.status);
        ELSIF NEW.watched_episodes IS DISTINCT FROM OLD.watched_episodes THEN
            act := 'update_progress';
            body := jsonb_build_object('watched_episodes', NEW.watched_episodes);
        ELSE
            RETURN NEW;
        END IF;
    END IF;

    FOR linked IN SELECT provider FROM oauth_tokens WHERE user_id = uid LOOP
        INSERT INTO library_sync_log
            (user_id, anime_id, provider, action, status, payload, error_message, created_at, updated_at)
        VALUES
            (uid, aid, linked.provider, act, 'pending', body::text, NULL, now(), now())
        ON CONFLICT (user_id, anime_id, provider, action) DO UPDATE
            SET status = 'pending',
                payload = EXCLUDED.payload,
                error_message = NULL,
                updated_at = now();

        PERFORM pg_notify('library_sync', json_build_object(
            'user_id', uid,
            'anime_id', aid,
            'provider', linked.provider,
            'action', act,
            'payload', body
        )::text);
    END LOOP;

    IF TG_OP = 'DELETE' THEN
        RETURN OLD;
    END IF;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
";

const IMPORT_JOB_FUNCTION: &str = r"
CREATE OR REPLACE FUNCTION library_import_jobs_notify() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify('library_import_jobs', json_build_object(
        'id', NEW.id,
        'user_id', NEW.user_id,
        'provider', NEW.provider,
        'status', NEW.status
    )::text);
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // LISTEN/NOTIFY only exists on Postgres.
        if manager.get_database_backend() != DatabaseBackend::Postgres {
            return Ok(());
        }
        let conn = manager.get_connection();

        conn.execute_unprepared(LIBRARY_SYNC_FUNCTION).await?;
        conn.execute_unprepared("DROP TRIGGER IF EXISTS library_sync_trigger ON library")
            .await?;
        conn.execute_unprepared(
            "CREATE TRIGGER library_sync_trigger AFTER INSERT OR UPDATE OR DELETE ON library \
             FOR EACH ROW EXECUTE FUNCTION library_sync_enqueue()",
        )
        .await?;

        conn.execute_unprepared(IMPORT_JOB_FUNCTION).await?;
        conn.execute_unprepared(
            "DROP TRIGGER IF EXISTS library_import_jobs_trigger ON library_import_jobs",
        )
        .await?;
        conn.execute_unprepared(
            "CREATE TRIGGER library_import_jobs_trigger AFTER INSERT ON library_import_jobs \
             FOR EACH ROW EXECUTE FUNCTION library_import_jobs_notify()",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        if manager.get_database_backend() != DatabaseBackend::Postgres {
            return Ok(());
        }
        let conn = manager.get_connection();

        conn.execute_unprepared("DROP TRIGGER IF EXISTS library_sync_trigger ON library")
            .await?;
        conn.execute_unprepared("DROP FUNCTION IF EXISTS library_sync_enqueue()")
            .await?;
        conn.execute_unprepared(
            "DROP TRIGGER IF EXISTS library_import_jobs_trigger ON library_import_jobs",
        )
        .await?;
        conn.execute_unprepared("DROP FUNCTION IF EXISTS library_import_jobs_notify()")
            .await?;
        Ok(())
    }
}
