/**
 * MOTEUR DU PONT - Cycle de vie broker + dispatch des messages
 *
 * RÔLE :
 * Tient l'unique connexion MQTT du process : connexion initiale retentée
 * indéfiniment (délai fixe 10s, annulable), un seul subscribe sur le topic
 * configuré, puis dispatch série des messages entrants.
 *
 * Par message : décodage → tentative Influx → tentative SQL (+ export après
 * commit). Chaque échec est isolé et loggé; aucune erreur ne termine le
 * process une fois la connexion initiale établie. Fire-and-forget : pas de
 * rejeu après échec d'un sink (at-most-once par sink).
 *
 * Le handler bloque le fil de dispatch (I/O sinks) : le débit broker est
 * borné par la latence des sinks, backpressure implicite.
 */

use crate::export::CsvExporter;
use crate::history::HistorySink;
use crate::influx::TimeSeriesSink;
use crate::telemetry::Telemetry;
use anyhow::Context;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, Transport};
use std::future::Future;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MqttConf;

/// Délai fixe entre deux tentatives de connexion broker
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Retente `attempt` indéfiniment avec un délai fixe entre les essais.
/// Pas de borne sur le nombre d'essais : c'est l'unique porte de démarrage
/// du process. None uniquement sur annulation.
pub async fn connect_with_retry<T, E, F, Fut>(
    mut attempt: F,
    delay: Duration,
    cancel: &CancellationToken,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match attempt().await {
            Ok(v) => return Some(v),
            Err(e) => {
                error!("connexion au broker échouée: {e}");
                info!("nouvel essai dans {}s", delay.as_secs());
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Une tentative de connexion : client neuf, poll jusqu'au ConnAck ou erreur
async fn try_connect(
    conf: &MqttConf,
) -> Result<(AsyncClient, EventLoop), rumqttc::ConnectionError> {
    let mut opts = MqttOptions::new("telebridge-engine", &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    // TLS obligatoire, pas de mode clair
    opts.set_transport(Transport::tls_with_default_config());
    if let (Some(user), Some(pass)) = (&conf.username, &conf.password) {
        opts.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    loop {
        if let Event::Incoming(Incoming::ConnAck(_)) = eventloop.poll().await? {
            return Ok((client, eventloop));
        }
    }
}

/// Le pont : une connexion broker, une connexion SQL, des sinks indépendants.
/// Chaque sink est optionnel : le pont tourne même si l'un manque au démarrage.
pub struct Bridge<T: TimeSeriesSink, H: HistorySink> {
    timeseries: Option<T>,
    history: Option<H>,
    exporter: CsvExporter,
}

impl<T: TimeSeriesSink, H: HistorySink> Bridge<T, H> {
    pub fn new(timeseries: Option<T>, history: Option<H>, exporter: CsvExporter) -> Self {
        Self {
            timeseries,
            history,
            exporter,
        }
    }

    /// Traite un message entrant. Pas de valeur de retour : chaque échec est
    /// loggé et consommé, le flux continue.
    pub async fn handle_message(&mut self, payload: &[u8]) {
        let telemetry = match Telemetry::decode(payload) {
            Ok(t) => t,
            Err(e) => {
                warn!("payload illisible, message ignoré: {e}");
                return;
            }
        };
        let arrival = OffsetDateTime::now_utc();
        debug!("message reçu: {}", telemetry.to_json());

        // 1) Influx — un échec ici n'empêche pas l'écriture SQL
        if let Some(sink) = &self.timeseries {
            if let Err(e) = sink.write_point(&telemetry, arrival).await {
                warn!("écriture Influx échouée: {e}");
            }
        }

        // 2) SQL borné, puis export du snapshot (après commit seulement)
        if let Some(history) = &mut self.history {
            match history.append(arrival, &telemetry.to_json()) {
                Ok(()) => {
                    if let Err(e) = self.exporter.export(&history.snapshot()) {
                        // le commit SQL reste acquis même si l'export échoue
                        warn!("export CSV échoué: {e}");
                    }
                }
                Err(e) => warn!("écriture SQL échouée: {e}"),
            }
        }
    }

    /// Boucle complète du pont : connexion initiale retentée, subscribe,
    /// dispatch jusqu'à annulation.
    pub async fn run(&mut self, conf: &MqttConf, cancel: CancellationToken) -> anyhow::Result<()> {
        let Some((client, mut eventloop)) =
            connect_with_retry(|| try_connect(conf), CONNECT_RETRY_DELAY, &cancel).await
        else {
            info!("arrêt demandé avant connexion, fermeture du pont");
            return Ok(());
        };
        info!("connecté au broker MQTT {}:{}", conf.host, conf.port);

        client
            .subscribe(&conf.topic, QoS::AtLeastOnce)
            .await
            .context("subscribe MQTT failed")?;
        info!("à l'écoute sur {}", conf.topic);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("arrêt demandé, fermeture du pont");
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        self.handle_message(&publish.payload).await;
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        // reconnexion rumqttc : se réabonner pour reprendre le flux
                        if let Err(e) = client.subscribe(&conf.topic, QoS::AtLeastOnce).await {
                            warn!("réabonnement échoué: {e}");
                        } else {
                            info!("reconnecté au broker, réabonné à {}", conf.topic);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("erreur MQTT: {e}");
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
    }
}
